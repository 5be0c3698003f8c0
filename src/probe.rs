use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Tunables for a single probe run, carried from [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub ports: Vec<u16>,
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub routability_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ports: vec![554, 80, 37777],
            timeout: Duration::from_secs_f64(2.0),
            max_concurrency: 50,
            routability_timeout: Duration::from_secs_f64(1.5),
        }
    }
}

/// A camera the prober needs a liveness verdict for.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub channel: i64,
    pub ip: String,
}

/// `true` iff `s` (after trimming) parses as an IPv4 or IPv6 address.
/// Hostnames, CIDR ranges, and `ip:port` strings are all rejected.
pub fn is_valid_ip(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.parse::<IpAddr>().is_ok()
}

/// Quick single-host check of whether this subnet is reachable at all.
/// Connection refused and ambiguous timeouts both count as "routable" -
/// only a clear unreachable/no-route/host-down signal says otherwise.
pub async fn check_routable(ip: &str, timeout: Duration) -> bool {
    let ip = ip.trim();
    if !is_valid_ip(ip) {
        return false;
    }

    match tokio::time::timeout(timeout, TcpStream::connect((ip, 80))).await {
        Ok(Ok(_stream)) => true,
        // Connection refused means a host answered - still routable.
        // Every other OS error (unreachable, no route, host down, or
        // anything else the kernel reports) is treated as not routable.
        Ok(Err(e)) => e.kind() == std::io::ErrorKind::ConnectionRefused,
        // Ambiguous: could be routable but slow. Don't mass-tag offline.
        Err(_elapsed) => true,
    }
}

/// Try each port in order; the first successful connect wins. Any
/// failure mode (timeout, refused, other OS error) on every port yields
/// `"offline"`.
async fn probe_camera_tcp(ip: &str, ports: &[u16], timeout: Duration) -> &'static str {
    for &port in ports {
        match tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await {
            Ok(Ok(_stream)) => {
                debug!("probe OK: {}:{}", ip, port);
                return "online";
            }
            _ => continue,
        }
    }
    debug!("probe FAIL: {} (all {} ports)", ip, ports.len());
    "offline"
}

/// Probe every camera concurrently (bounded by `config.max_concurrency`),
/// gated by a single routability check against the first valid IP.
/// Every input channel is guaranteed a verdict in the output map.
pub async fn probe_many(
    cameras: &[ProbeTarget],
    config: &ProbeConfig,
) -> HashMap<i64, String> {
    let mut results: HashMap<i64, String> = HashMap::new();

    let mut remaining = Vec::new();
    for cam in cameras {
        if is_valid_ip(&cam.ip) {
            remaining.push(cam.clone());
        } else {
            results.insert(cam.channel, "unknown".to_string());
        }
    }

    if let Some(sample) = remaining.first() {
        let routable = check_routable(&sample.ip, config.routability_timeout).await;
        if !routable {
            info!(
                "subnet not routable from this host (tested {}) - all cameras -> unknown",
                sample.ip
            );
            for cam in &remaining {
                results.insert(cam.channel, "unknown".to_string());
            }
            return results;
        }
    } else {
        return results;
    }

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut tasks = Vec::with_capacity(remaining.len());

    for cam in remaining {
        let semaphore = semaphore.clone();
        let ports = config.ports.clone();
        let timeout = config.timeout;
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
            let status = probe_camera_tcp(&cam.ip, &ports, timeout).await;
            (cam.channel, status)
        }));
    }

    let mut online = 0;
    let mut offline = 0;
    let mut unknown = 0;

    for task in tasks {
        match task.await {
            Ok((channel, status)) => {
                match status {
                    "online" => online += 1,
                    "offline" => offline += 1,
                    _ => unknown += 1,
                }
                results.insert(channel, status.to_string());
            }
            Err(e) => {
                debug!("probe task panicked: {}", e);
            }
        }
    }

    for cam in cameras {
        results.entry(cam.channel).or_insert_with(|| {
            unknown += 1;
            "unknown".to_string()
        });
    }

    info!(
        "probe complete: {} cameras - {} online, {} offline, {} unknown",
        results.len(),
        online,
        offline,
        unknown
    );

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn is_valid_ip_rejects_non_ips() {
        for s in ["", "   ", "nvr.local", "192.168.1", "192.168.1.1:80", "10.0.0.0/24"] {
            assert!(!is_valid_ip(s), "expected {:?} to be invalid", s);
        }
    }

    #[test]
    fn is_valid_ip_accepts_valid_ips() {
        for s in ["0.0.0.0", "255.255.255.255", "::1", "  10.1.1.200  "] {
            assert!(is_valid_ip(s), "expected {:?} to be valid", s);
        }
    }

    #[tokio::test]
    async fn probe_many_marks_invalid_ip_as_unknown() {
        let cameras = vec![ProbeTarget { channel: 1, ip: "not-an-ip".to_string() }];
        let results = probe_many(&cameras, &ProbeConfig::default()).await;
        assert_eq!(results.get(&1).unwrap(), "unknown");
    }

    #[tokio::test]
    async fn probe_many_finds_online_camera() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let cameras = vec![ProbeTarget { channel: 1, ip: "127.0.0.1".to_string() }];
        let config = ProbeConfig {
            ports: vec![port],
            timeout: Duration::from_millis(500),
            max_concurrency: 10,
            routability_timeout: Duration::from_millis(500),
        };
        let results = probe_many(&cameras, &config).await;
        assert_eq!(results.get(&1).unwrap(), "online");
    }

    #[tokio::test]
    async fn probe_many_covers_every_input_channel() {
        let cameras = vec![
            ProbeTarget { channel: 1, ip: "".to_string() },
            ProbeTarget { channel: 2, ip: "bad-host".to_string() },
        ];
        let results = probe_many(&cameras, &ProbeConfig::default()).await;
        assert_eq!(results.len(), 2);
        assert!(results.contains_key(&1));
        assert!(results.contains_key(&2));
    }
}
