use std::time::Duration;

use md5::{Digest, Md5};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::SyncError;

use super::transport::RpcTransport;

/// An authenticated RPC2 session token, obtained from the two-step login.
pub struct LoginSession {
    pub session: String,
}

fn md5_upper_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex_upper(&digest)
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02X}", b));
    }
    s
}

/// Compute Dahua's two-step MD5 challenge/response digest.
pub fn compute_dahua_hash(user: &str, password: &str, realm: &str, random: &str) -> String {
    let step1 = md5_upper_hex(&format!("{}:{}:{}", user, realm, password));
    md5_upper_hex(&format!("{}:{}:{}", user, random, step1))
}

/// Run the init → authenticate two-step login against `base_url`.
pub async fn login(
    transport: &RpcTransport,
    base_url: &str,
    user: &str,
    password: &str,
    timeout: Duration,
) -> Result<LoginSession, SyncError> {
    let login_url = format!("{}/RPC2_Login", base_url);
    let init_body = json!({
        "method": "global.login",
        "params": {
            "userName": user,
            "password": "",
            "clientType": "Web3.0",
        },
        "id": 1,
    });

    let init_resp = match transport.post(&login_url, &init_body, timeout).await {
        Ok(resp) => resp,
        Err(SyncError::Timeout) => {
            warn!("login init timed out, retrying once");
            transport.post(&login_url, &init_body, timeout).await?
        }
        Err(e) => return Err(e),
    };

    let params = init_resp.get("params");
    let realm = params.and_then(|p| p.get("realm")).and_then(|v| v.as_str());
    let random = params.and_then(|p| p.get("random")).and_then(|v| v.as_str());
    let session = init_resp.get("session").and_then(|v| v.as_str());

    let (realm, random, session) = match (realm, random, session) {
        (Some(realm), Some(random), Some(session)) => (realm, random, session.to_string()),
        _ => {
            return Err(SyncError::LoginRejected(
                "not a Dahua device or wrong port: missing realm/random/session in login response"
                    .to_string(),
            ))
        }
    };

    let digest = compute_dahua_hash(user, password, realm, random);

    let auth_body = json!({
        "method": "global.login",
        "params": {
            "userName": user,
            "password": digest,
            "clientType": "Web3.0",
            "authorityType": "Default",
        },
        "id": 2,
        "session": session,
    });

    let auth_resp = transport.post(&login_url, &auth_body, timeout).await?;

    let ok = auth_resp.get("result").and_then(|v| v.as_bool()).unwrap_or(false);
    if !ok {
        let code = auth_resp
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_i64());
        return Err(SyncError::LoginRejected(match code {
            Some(code) => format!("nvr rejected credentials (code={})", code),
            None => "nvr rejected credentials".to_string(),
        }));
    }

    Ok(LoginSession { session })
}

/// Best-effort logout. Failures are swallowed - the spec requires logout
/// to never surface an error on an exit path.
pub async fn logout(transport: &RpcTransport, base_url: &str, session: &str, timeout: Duration) {
    let logout_url = format!("{}/RPC2", base_url);
    let body = json!({
        "method": "global.logout",
        "params": {},
        "id": 99,
        "session": session,
    });

    if let Err(e) = transport.post(&logout_url, &body, timeout).await {
        debug!("logout failed (ignored): {}", e);
    }
}
