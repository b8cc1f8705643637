use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::debug;

use super::NetworkProbe;

/// Checks connectivity by opening TCP connections to well-known hosts.
///
/// The network counts as reachable as soon as any one host accepts.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    hosts: Vec<String>,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(hosts: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            hosts,
            connect_timeout,
        }
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn reachable(&self) -> bool {
        let mut attempts = JoinSet::new();
        for host in &self.hosts {
            let host = host.clone();
            let timeout = self.connect_timeout;
            attempts.spawn(async move {
                let result = tokio::time::timeout(timeout, TcpStream::connect(host.as_str())).await;
                match result {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => {
                        debug!(host = %host, error = %e, "probe host refused");
                        false
                    }
                    Err(_) => {
                        debug!(host = %host, "probe host timed out");
                        false
                    }
                }
            });
        }

        while let Some(result) = attempts.join_next().await {
            if matches!(result, Ok(true)) {
                attempts.abort_all();
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reachable_when_any_host_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(
            vec!["127.0.0.1:1".to_string(), addr.to_string()],
            Duration::from_secs(2),
        );
        assert!(probe.reachable().await);
    }

    #[tokio::test]
    async fn unreachable_with_no_hosts() {
        let probe = TcpProbe::new(Vec::new(), Duration::from_millis(100));
        assert!(!probe.reachable().await);
    }
}
