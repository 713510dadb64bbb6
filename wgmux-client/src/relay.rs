/// The client leg's own forwarding: a single fixed upstream (`server`),
/// not a table — by design the client only ever talks to one server.
use crate::mangler::Mangler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use wgmux_core::packet::MAX_MTU;

pub async fn run_relay(
    listen: Arc<UdpSocket>,
    server_addr: SocketAddr,
    mangler: Mangler,
) -> std::io::Result<()> {
    let mut client_addr: Option<SocketAddr> = None;
    let mut buf = [0u8; MAX_MTU];

    loop {
        let (n, from) = listen.recv_from(&mut buf).await?;

        if from == server_addr {
            // Reply from the server, untouched — forward to whichever
            // local peer we last heard from.
            if let Some(dest) = client_addr {
                listen.send_to(&buf[..n], dest).await?;
            }
            continue;
        }

        client_addr = Some(from);
        mangler.mangle(&mut buf[..n]);
        listen.send_to(&buf[..n], server_addr).await?;
    }
}
