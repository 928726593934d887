//! A full client/server RPC round trip carried over real OS pipes via
//! `FdChannel`, rather than the in-process paired channel the other
//! integration tests use.

use std::os::unix::io::IntoRawFd;
use std::sync::Arc;
use std::time::Duration;

use chrpc::channel::fd::{FdChannel, FdChannelConfig};
use chrpc::{ClientAttrs, Directive, Endpoint, EndpointSet, RpcClient, RpcServer, ServerConfig, Type, Value};

fn make_channel(read_fd: std::os::unix::io::RawFd, write_fd: std::os::unix::io::RawFd) -> FdChannel {
    FdChannel::new(FdChannelConfig {
        queue_depth: 8,
        write_fd,
        read_fd: Some(read_fd),
        write_over: false,
        max_msg_size: 4096,
        read_chunk_size: 512,
    })
    .unwrap()
}

#[test]
fn echo_round_trips_over_a_pair_of_pipes() {
    let (server_read, client_write) = nix::unistd::pipe().unwrap();
    let (client_read, server_write) = nix::unistd::pipe().unwrap();

    let server_channel = make_channel(server_read.into_raw_fd(), server_write.into_raw_fd());
    let client_channel = make_channel(client_read.into_raw_fd(), client_write.into_raw_fd());

    let echo = Endpoint::new("echo", vec![Type::String], Some(Type::String), |_, _, args| {
        (Some(args[0].clone()), Directive::KeepAlive)
    })
    .unwrap();
    let server = RpcServer::new(
        (),
        EndpointSet::new(vec![echo]).unwrap(),
        ServerConfig {
            max_connections: 4,
            num_workers: 1,
            max_msg_size: 4096,
            idle_timeout: Duration::from_secs(5),
            worker_usleep_amt: Duration::from_millis(5),
        },
    )
    .unwrap();
    server.give_channel(Arc::new(server_channel)).unwrap();

    let mut client = RpcClient::new(
        Arc::new(client_channel),
        ClientAttrs { cadence: Duration::from_millis(10), timeout: Duration::from_secs(3) },
    )
    .unwrap();

    let result = client.call("echo", &[Value::string("over a pipe")]).unwrap();
    assert_eq!(result, Some(Value::string("over a pipe")));
}
