//! Link to the local bundle router: registration and contact updates.

use std::sync::Arc;

use async_trait::async_trait;
use ipnd_core::ContactUpdate;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Sequential request/response link. Each call completes before the next one starts.
#[async_trait]
pub trait RouterLink: Send {
    /// Register under `identity_suffix`; returns the EID assigned to this node.
    async fn register(&mut self, identity_suffix: &str) -> anyhow::Result<String>;

    async fn submit_contact_update(&mut self, update: &ContactUpdate) -> anyhow::Result<()>;
}

/// Router shared by the discovery tasks; the mutex serializes requests on the link.
pub type SharedRouter<R> = Arc<Mutex<R>>;

/// Request as written on the JSON lines link.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request<'a> {
    Register {
        identity_suffix: &'a str,
        eid: &'a str,
    },
    ContactUpdate(&'a ContactUpdate),
}

/// Writes each request as one JSON object per line for an external router adaptor.
/// Registration always succeeds with the configured node EID.
pub struct JsonLinesRouter<W> {
    node_eid: String,
    out: W,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesRouter<W> {
    pub fn new(node_eid: impl Into<String>, out: W) -> Self {
        Self {
            node_eid: node_eid.into(),
            out,
        }
    }

    async fn send(&mut self, req: &Request<'_>) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(req)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RouterLink for JsonLinesRouter<W> {
    async fn register(&mut self, identity_suffix: &str) -> anyhow::Result<String> {
        let eid = self.node_eid.clone();
        self.send(&Request::Register {
            identity_suffix,
            eid: &eid,
        })
        .await?;
        Ok(eid)
    }

    async fn submit_contact_update(&mut self, update: &ContactUpdate) -> anyhow::Result<()> {
        self.send(&Request::ContactUpdate(update)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnd_core::ContactWindow;

    #[tokio::test]
    async fn writes_one_json_line_per_request() {
        let mut buf = Vec::new();
        let mut router = JsonLinesRouter::new("dtn://self.dtn", &mut buf);
        let eid = router.register("ipcn").await.unwrap();
        assert_eq!(eid, "dtn://self.dtn");
        let update = ContactUpdate {
            neighbor_eid: "dtn://peer.dtn".into(),
            cla_address: "tcpclv3:10.0.0.2:4556".into(),
            contacts: vec![ContactWindow::for_period(2, 1000)],
        };
        router.submit_contact_update(&update).await.unwrap();
        drop(router);

        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "register");
        assert_eq!(lines[0]["identity_suffix"], "ipcn");
        assert_eq!(lines[1]["type"], "contact_update");
        assert_eq!(lines[1]["neighbor_eid"], "dtn://peer.dtn");
        assert_eq!(lines[1]["contacts"][0]["end"]["secs"], 3);
        assert_eq!(lines[1]["contacts"][0]["capacity"], 1000);
    }
}
