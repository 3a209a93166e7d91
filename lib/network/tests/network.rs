use koral_common::ClusterAddresses;
use koral_network::framing::{read_frame, write_frame};
use koral_network::{MessageTransport, NetworkContext, NetworkManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn frames_are_read_in_order() {
    let (mut client, mut server) = tokio::io::duplex(64);
    write_frame(&mut client, b"first").await.unwrap();
    write_frame(&mut client, b"").await.unwrap();
    drop(client);

    assert_eq!(read_frame(&mut server).await.unwrap(), Some(b"first".to_vec()));
    assert_eq!(read_frame(&mut server).await.unwrap(), Some(Vec::new()));
    assert_eq!(read_frame(&mut server).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn managers_exchange_messages() {
    let master_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let slave_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addresses = ClusterAddresses::new(vec![
        master_listener.local_addr().unwrap(),
        slave_listener.local_addr().unwrap(),
    ]);

    let context = NetworkContext::current().unwrap();
    let timeout = Duration::from_secs(5);
    let master = Arc::new(
        NetworkManager::with_listener(context.clone(), 0, &addresses, master_listener, timeout)
            .unwrap(),
    );
    let slave = Arc::new(
        NetworkManager::with_listener(context, 1, &addresses, slave_listener, timeout).unwrap(),
    );

    let received = tokio::task::spawn_blocking(move || {
        assert!(master.send(1, b"hello"));
        assert!(master.send(1, b"world"));
        assert!(slave.send(1, b"self"));

        let mut received = Vec::new();
        while received.len() < 3 {
            if let Some(message) = slave.receive(true) {
                received.push(message);
            }
        }
        received
    })
    .await
    .unwrap();

    let remote = received
        .iter()
        .filter(|message| message.as_slice() != b"self")
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(remote, vec![b"hello".to_vec(), b"world".to_vec()]);
    assert!(received.contains(&b"self".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_from_runtime_thread_does_not_block() {
    let master_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let slave_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addresses = ClusterAddresses::new(vec![
        master_listener.local_addr().unwrap(),
        slave_listener.local_addr().unwrap(),
    ]);

    let context = NetworkContext::current().unwrap();
    let timeout = Duration::from_secs(5);
    let master =
        NetworkManager::with_listener(context.clone(), 0, &addresses, master_listener, timeout)
            .unwrap();
    let slave = Arc::new(
        NetworkManager::with_listener(context, 1, &addresses, slave_listener, timeout).unwrap(),
    );

    assert!(master.send(1, b"clear"));
    let received = tokio::task::spawn_blocking(move || slave.receive(true))
        .await
        .unwrap();
    assert_eq!(received, Some(b"clear".to_vec()));
}
