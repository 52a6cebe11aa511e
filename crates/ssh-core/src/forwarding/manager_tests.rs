//! Unit tests for forwarding manager.

use async_trait::async_trait;
use dt_types::ssh::PortForward;

use super::*;
use crate::forwarding::ForwardStream;

/// Registrar that refuses every port in `refused` and echoes the rest.
struct PickyRegistrar {
    refused: Vec<u16>,
}

#[async_trait]
impl RemoteRegistrar for PickyRegistrar {
    async fn request_tcpip_forward(&mut self, _bind_address: String, bind_port: u16) -> Result<u32> {
        if self.refused.contains(&bind_port) {
            return Err(SshCoreError::Other("administratively prohibited".into()));
        }
        Ok(0)
    }
}

fn remote_config(policy: ForwardFailurePolicy) -> ForwardingConfig {
    ForwardingConfig {
        local: Vec::new(),
        remote: vec![
            PortForward::ports(3000, 8080).with_defaults(),
            PortForward::ports(3001, 8081).with_defaults(),
        ],
        policy,
    }
}

#[test]
fn descriptors_include_both_directions() {
    let mut config = ForwardingConfig::default();
    config.local.push(PortForward {
        local_addr: "127.0.0.1".into(),
        local_port: 5432,
        remote_addr: "db.internal".into(),
        remote_port: 5432,
    });
    config.remote.push(PortForward {
        local_addr: "127.0.0.1".into(),
        local_port: 3000,
        remote_addr: "0.0.0.0".into(),
        remote_port: 9090,
    });
    let manager = ForwardingManager::new(config);
    let descriptors = manager.descriptors();
    assert_eq!(
        descriptors,
        vec![
            "remote 0.0.0.0:9090 -> 127.0.0.1:3000".to_string(),
            "local 127.0.0.1:5432 -> db.internal:5432".to_string(),
        ]
    );
    assert!(manager.has_requests());
}

#[tokio::test]
async fn all_or_nothing_stops_at_first_refusal() {
    let manager = ForwardingManager::new(remote_config(ForwardFailurePolicy::AllOrNothing));
    let mut registrar = PickyRegistrar { refused: vec![8080] };
    let err = manager.start_remote_forwards(&mut registrar).await.unwrap_err();
    assert!(matches!(err, SshCoreError::ListenerFailed { ref address, .. } if address == "127.0.0.1:8080"));
    assert!(manager.remote_bindings().await.is_empty());
}

#[tokio::test]
async fn best_effort_reports_refusal_and_keeps_others() {
    let manager = ForwardingManager::new(remote_config(ForwardFailurePolicy::BestEffort));
    let mut registrar = PickyRegistrar { refused: vec![8080] };
    let outcomes = manager.start_remote_forwards(&mut registrar).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(!outcomes[0].is_ok());
    assert!(outcomes[0].result.as_ref().unwrap_err().contains("administratively prohibited"));
    assert_eq!(outcomes[1].result, Ok(8081));
    assert_eq!(manager.remote_bindings().await, vec![("127.0.0.1".to_string(), 8081)]);

    manager.shutdown::<NoopSession>(None).await;
    assert!(manager.remote_bindings().await.is_empty());
}

#[derive(Clone)]
struct NoopSession;

#[async_trait]
impl ForwardSession for NoopSession {
    async fn open_direct_tcpip(&self, _: String, _: u16, _: String, _: u16) -> Result<ForwardStream> {
        Err(SshCoreError::Other("unused".into()))
    }

    async fn cancel_tcpip_forwarding(&self, _: String, _: u32) -> Result<()> {
        Ok(())
    }
}
