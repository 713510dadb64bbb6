/// The listen loop: one task reading the shared UDP socket, deobfuscating
/// each datagram, routing Initiation frames through the peer resolver and
/// reusing established entries for everything else.
use std::sync::Arc;
use wgmux_core::config::Server;
use wgmux_core::obfuscate::Obfuscator;
use wgmux_core::packet::{Packet, MAX_MTU};
use wgmux_core::resolver::resolve_initiation;
use wgmux_core::table::ForwardingTable;
use wgmux_core::wireguard::MessageType;

pub async fn run_listen_loop(
    listen: Arc<tokio::net::UdpSocket>,
    table: Arc<ForwardingTable>,
    obfuscator: Arc<Obfuscator>,
    servers: Vec<Server>,
) -> std::io::Result<()> {
    let mut buf = [0u8; MAX_MTU];
    loop {
        let (n, src) = listen.recv_from(&mut buf).await?;

        let mut packet = Packet::new();
        packet.reset(n);
        packet.as_mut_slice().copy_from_slice(&buf[..n]);
        obfuscator.deobfuscate(&mut packet);

        if let Err(e) = route_datagram(&table, &servers, src, &mut packet).await {
            tracing::debug!(client = %src, error = %e, "dropping datagram");
        }
    }
}

async fn route_datagram(
    table: &Arc<ForwardingTable>,
    servers: &[Server],
    src: std::net::SocketAddr,
    packet: &mut Packet,
) -> Result<(), wgmux_core::error::Error> {
    match packet.message_type() {
        Some(MessageType::Initiation) => {
            let (_server_index, upstream) = resolve_initiation(servers, packet.as_slice())?;
            table
                .forward_client_to_upstream(src, upstream, packet.as_slice())
                .await
                .map_err(|cause| wgmux_core::error::Error::SocketIo {
                    addr: Some(upstream),
                    cause,
                })
        }
        Some(_) => match table.existing_upstream(src) {
            Some(upstream) => table
                .forward_client_to_upstream(src, upstream, packet.as_slice())
                .await
                .map_err(|cause| wgmux_core::error::Error::SocketIo {
                    addr: Some(upstream),
                    cause,
                }),
            None => Err(wgmux_core::error::Error::UnroutedDatagram { src }),
        },
        None => Err(wgmux_core::error::Error::UnroutedDatagram { src }),
    }
}
