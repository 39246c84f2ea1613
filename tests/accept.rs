//! Acceptor scenarios: cookie exchange over real sockets, rejection,
//! cancellation and callback ownership.

mod dtls_common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dtls_common::{client_config, connect_client, localhost, server_config};
use udtls::{Acceptor, DtlsSocket, Error, GenerateCookie, HmacCookieFactory, Side};

#[tokio::test]
async fn accept_promotes_verified_peer() {
    let _ = env_logger::try_init();

    let mut acceptor = Acceptor::bind(localhost()).expect("bind acceptor");
    let cookies = HmacCookieFactory::new();
    acceptor.set_cookie_generate_callback(cookies.clone());
    acceptor.set_cookie_verify_callback(cookies);
    let listener_addr = acceptor.local_endpoint().expect("listener addr");

    let client_task = tokio::spawn(async move {
        let (mut client, local) = connect_client(client_config(), listener_addr).await;
        client.handshake(Side::Client).await.expect("client handshake");
        (client, local)
    });

    let mut session = DtlsSocket::new(server_config()).expect("session");
    let mut buf = vec![0u8; 64 * 1024];
    let peer = acceptor
        .accept(&mut session, &mut buf)
        .await
        .expect("accept");
    session
        .handshake(Side::Server)
        .await
        .expect("server handshake");

    let (_client, client_local) = client_task.await.expect("client task");

    // The promoted socket is connected to exactly the verified peer and
    // shares the listener's local endpoint.
    assert_eq!(peer, client_local);
    assert_eq!(session.peer_endpoint().expect("peer"), client_local);
    assert_eq!(session.local_endpoint().expect("local"), listener_addr);
}

#[tokio::test]
async fn accept_without_callbacks_fails_fast() {
    let acceptor = Acceptor::bind(localhost()).expect("bind acceptor");
    let mut session = DtlsSocket::new(server_config()).expect("session");
    let mut buf = vec![0u8; 2048];

    assert!(matches!(
        acceptor.accept(&mut session, &mut buf).await,
        Err(Error::MissingCookieCallbacks)
    ));
}

#[tokio::test]
async fn rejected_cookies_never_promote() {
    let _ = env_logger::try_init();

    let mut acceptor = Acceptor::bind(localhost()).expect("bind acceptor");
    let rejected = Arc::new(AtomicUsize::new(0));
    let counter = rejected.clone();

    acceptor.set_cookie_generate_callback(|_: &SocketAddr| b"any-cookie".to_vec());
    acceptor.set_cookie_verify_callback(move |_: &SocketAddr, _: &[u8]| {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    });

    let listener_addr = acceptor.local_endpoint().expect("listener addr");
    let acceptor = Arc::new(acceptor);

    let acc = acceptor.clone();
    let accept_task = tokio::spawn(async move {
        let mut session = DtlsSocket::new(server_config()).expect("session");
        let mut buf = vec![0u8; 64 * 1024];
        acc.accept(&mut session, &mut buf).await.map(|_| ())
    });

    // Two legitimate cookie-echoing attempts, both rejected by the
    // verifier. The clients stall waiting for a ServerHello that never
    // comes; the listener re-arms each time.
    for _ in 0..2 {
        let (mut client, _) = connect_client(client_config(), listener_addr).await;
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            client.handshake(Side::Client),
        )
        .await;
    }

    assert!(rejected.load(Ordering::SeqCst) >= 2);
    assert!(!accept_task.is_finished(), "accept must remain pending");

    acceptor.cancel();
    assert!(matches!(
        accept_task.await.expect("join"),
        Err(Error::Aborted)
    ));
}

#[tokio::test]
async fn cancel_completes_with_aborted() {
    let mut acceptor = Acceptor::bind(localhost()).expect("bind acceptor");
    let cookies = HmacCookieFactory::new();
    acceptor.set_cookie_generate_callback(cookies.clone());
    acceptor.set_cookie_verify_callback(cookies);
    let acceptor = Arc::new(acceptor);

    let acc = acceptor.clone();
    let accept_task = tokio::spawn(async move {
        let mut session = DtlsSocket::new(server_config()).expect("session");
        let mut buf = vec![0u8; 2048];
        acc.accept(&mut session, &mut buf).await.map(|_| ())
    });

    // Let the receive arm before cancelling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    acceptor.cancel();

    assert!(matches!(
        accept_task.await.expect("join"),
        Err(Error::Aborted)
    ));
}

struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl GenerateCookie for DropCounter {
    fn generate(&self, _peer: &SocketAddr) -> Vec<u8> {
        vec![1]
    }
}

#[tokio::test]
async fn replacing_cookie_callback_releases_old_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut acceptor = Acceptor::bind(localhost()).expect("bind acceptor");

    acceptor.set_cookie_generate_callback(DropCounter {
        drops: drops.clone(),
    });
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    acceptor.set_cookie_generate_callback(HmacCookieFactory::new());
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    acceptor.set_cookie_generate_callback(HmacCookieFactory::new());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
