//! Full path over real sockets: cookie exchange, promotion, handshake,
//! application data in both directions, clean shutdown.

mod dtls_common;

use dtls_common::{client_config, connect_client, localhost, server_config};
use udtls::{Acceptor, DtlsSocket, Error, HmacCookieFactory, Side};

#[tokio::test]
async fn handshake_then_round_trip() {
    let _ = env_logger::try_init();

    let mut acceptor = Acceptor::bind(localhost()).expect("bind acceptor");
    let cookies = HmacCookieFactory::new();
    acceptor.set_cookie_generate_callback(cookies.clone());
    acceptor.set_cookie_verify_callback(cookies);
    let listener_addr = acceptor.local_endpoint().expect("listener addr");

    let client_task = tokio::spawn(async move {
        let (mut client, _) = connect_client(client_config(), listener_addr).await;
        client.handshake(Side::Client).await.expect("client handshake");

        let sent = client.write(b"hello from client").await.expect("write");
        assert_eq!(sent, 17);

        let mut buf = vec![0u8; 2048];
        let n = client.read(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"hello from server");

        client.shutdown().await.expect("client shutdown");
    });

    let mut session = DtlsSocket::new(server_config()).expect("session");
    let mut buf = vec![0u8; 64 * 1024];
    acceptor
        .accept(&mut session, &mut buf)
        .await
        .expect("accept");
    session
        .handshake(Side::Server)
        .await
        .expect("server handshake");

    let mut data = vec![0u8; 2048];
    let n = session.read(&mut data).await.expect("server read");
    assert_eq!(&data[..n], b"hello from client");

    let sent = session.write(b"hello from server").await.expect("write");
    assert_eq!(sent, 17);

    // The peer closes cleanly: the next read reports EOF, not truncation.
    let err = session.read(&mut data).await.expect_err("read after close");
    assert!(matches!(err, Error::Eof), "expected clean EOF, got {err:?}");

    session.shutdown().await.expect("server shutdown");
    client_task.await.expect("client task");
}
