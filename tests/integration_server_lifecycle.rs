//! Connection lifecycle: idle timeout, explicit disconnect directives, and
//! server shutdown all release admitted channels exactly once.

use std::time::Duration;

use chrpc::channel::local::{LocalChannel, LocalChannelConfig};
use chrpc::{ClientAttrs, Directive, Endpoint, EndpointSet, RpcServer, ServerConfig, Type, Value};

fn fast_config() -> ServerConfig {
    ServerConfig {
        max_connections: 8,
        num_workers: 1,
        max_msg_size: 4096,
        idle_timeout: Duration::from_millis(80),
        worker_usleep_amt: Duration::from_millis(5),
    }
}

#[test]
fn idle_channel_is_disconnected_after_the_configured_timeout() {
    let echo = Endpoint::new("echo", vec![Type::String], Some(Type::String), |_, _, args| {
        (Some(args[0].clone()), Directive::KeepAlive)
    })
    .unwrap();
    let server = RpcServer::new((), EndpointSet::new(vec![echo]).unwrap(), fast_config()).unwrap();

    // Admit a channel directly (no client ever talks on it) so it sits idle.
    let local = LocalChannel::new(LocalChannelConfig { max_msg_size: 4096, ..Default::default() });
    server.give_channel(std::sync::Arc::new(local)).unwrap();
    assert_eq!(server.num_channels(), 1);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(server.num_channels(), 0);
}

#[test]
fn disconnect_directive_releases_the_channel() {
    let bye = Endpoint::argless("bye", |_: &(), _, _| (None, Directive::Disconnect)).unwrap();
    let server = RpcServer::new((), EndpointSet::new(vec![bye]).unwrap(), fast_config()).unwrap();
    let mut client = server
        .local_client(ClientAttrs { cadence: Duration::from_millis(5), timeout: Duration::from_secs(2) })
        .unwrap();

    assert_eq!(client.call("bye", &[]), Ok(None));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(server.num_channels(), 0);
}

#[test]
fn dropping_the_server_closes_every_remaining_channel() {
    let echo = Endpoint::new("echo", vec![Type::String], Some(Type::String), |_, _, args| {
        (Some(args[0].clone()), Directive::KeepAlive)
    })
    .unwrap();
    let server = RpcServer::new((), EndpointSet::new(vec![echo]).unwrap(), fast_config()).unwrap();
    let local = LocalChannel::new(LocalChannelConfig { max_msg_size: 4096, ..Default::default() });
    server.give_channel(std::sync::Arc::new(local)).unwrap();

    // Dropping joins every worker and closes every still-queued channel;
    // this must return promptly rather than hang.
    drop(server);
}
