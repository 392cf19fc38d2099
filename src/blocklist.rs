use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::conf;

const FALLBACK_IP: &str = "127.0.0.1";

/// The blocklist, looked up afresh on every request.
#[derive(Debug, Clone)]
pub enum Blocklist {
    Static(Vec<String>),
    Remote { client: reqwest::Client, url: String },
}

/// A remote blocklist document is either one address or a list of them.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Blocklist {
    pub fn from_conf(conf: &conf::IpBlocklist) -> anyhow::Result<Self> {
        let selph = match conf {
            conf::IpBlocklist::Static { ips } => Self::Static(ips.clone()),
            conf::IpBlocklist::Remote { url, timeout } => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs_f32(*timeout))
                    .build()
                    .context("Failed to build blocklist HTTP client")?;
                Self::Remote {
                    client,
                    url: url.clone(),
                }
            }
        };
        Ok(selph)
    }

    pub async fn blocked_ips(&self) -> anyhow::Result<Vec<String>> {
        match self {
            Self::Static(ips) => Ok(ips.clone()),
            Self::Remote { client, url } => {
                let doc: OneOrMany = client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                let ips = match doc {
                    OneOrMany::One(ip) => vec![ip],
                    OneOrMany::Many(ips) => ips,
                };
                Ok(ips)
            }
        }
    }
}

/// First hop of `X-Forwarded-For`, or loopback when there is none.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(FALLBACK_IP)
        .to_string()
}

pub async fn layer(
    State(blocklist): State<Blocklist>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers());
    match blocklist.blocked_ips().await {
        Ok(blocked) if blocked.contains(&ip) => {
            tracing::info!(ip, "Blocked request by ip.");
            return (StatusCode::FORBIDDEN, "Access denied").into_response();
        }
        Ok(_) => {}
        Err(error) => {
            tracing::error!(?error, "Failed to fetch IP blocklist.");
        }
    }
    next.run(req).await
}
