use crate::{packet_stream::PacketStream, server::Shared};
use bytes::Bytes;
use mqtt_broker::{authorize, Authorizer, ConnectionId, ListenerId, Transport};
use mqtt_protocol::Packet;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
	io::AsyncWriteExt,
	net::{tcp::OwnedWriteHalf, TcpStream},
	sync::mpsc,
	time,
};

#[derive(Debug)]
pub(crate) enum Outbound {
	Bytes(Bytes),
	Close,
}

/// The broker's side of a TCP connection. Bytes are queued for the
/// connection's task, which writes them to the socket.
#[derive(Debug)]
pub struct ConnectionHandle {
	tx: mpsc::UnboundedSender<Outbound>,
	peer: Option<SocketAddr>,
}

impl Transport for ConnectionHandle {
	fn send(&mut self, bytes: Bytes) -> bool {
		self.tx.send(Outbound::Bytes(bytes)).is_ok()
	}

	fn close(&mut self) {
		let _ = self.tx.send(Outbound::Close);
	}

	#[inline]
	fn peer_address(&self) -> Option<SocketAddr> {
		self.peer
	}
}

/// Serves one accepted TCP connection until either side closes it.
#[tracing::instrument(skip(shared, stream), fields(connection))]
pub(crate) async fn run<A>(
	shared: Arc<Shared<A>>,
	listener: ListenerId,
	stream: TcpStream,
	peer: SocketAddr,
) where
	A: Authorizer + Send + Sync + 'static,
{
	let (tx, mut rx) = mpsc::unbounded_channel();
	let handle = ConnectionHandle {
		tx,
		peer: Some(peer),
	};

	let accepted = shared.broker.lock().await.accept(listener, handle, Instant::now());
	let id = match accepted {
		Ok(id) => id,
		Err(error) => {
			tracing::warn!(%error, "rejecting connection");
			return;
		}
	};
	tracing::Span::current().record("connection", tracing::field::display(id));

	let (reader, mut writer) = stream.into_split();
	let mut reader = PacketStream::new(reader, 8 * 1024);
	let mut reading = true;

	loop {
		let deadline = shared.broker.lock().await.deadline(id);

		#[rustfmt::skip]
		tokio::select! {
			packet = reader.read_packet(), if reading => {
				match packet {
					Ok(Some(packet)) => {
						tracing::trace!(?packet);
						received(&shared, id, listener, peer, packet).await;
					}
					Ok(None) => {
						tracing::debug!("closed by peer");
						reading = false;
						shared.close(id).await;
					}
					Err(error) => {
						tracing::warn!(%error, "read failed");
						reading = false;
						shared.close(id).await;
					}
				}
			}
			outbound = rx.recv() => match outbound {
				Some(Outbound::Bytes(bytes)) => {
					if let Err(error) = write(&mut writer, &bytes).await {
						tracing::warn!(%error, "write failed");
						reading = false;
						shared.close(id).await;
					}
				}
				// The broker has forgotten the connection.
				Some(Outbound::Close) | None => break,
			},
			_ = time::sleep_until(deadline.map_or_else(time::Instant::now, time::Instant::from_std)), if deadline.is_some() => {
				let mut broker = shared.broker.lock().await;
				broker.handle_timeout(id, Instant::now());
				shared.forward_events(&mut broker);
			}
		}
	}

	let _ = writer.shutdown().await;
	tracing::debug!("connection task finished");
}

async fn received<A>(
	shared: &Shared<A>,
	id: ConnectionId,
	listener: ListenerId,
	peer: SocketAddr,
	packet: Packet,
) where
	A: Authorizer,
{
	let client_id = shared.broker.lock().await.client_id(id).map(str::to_owned);

	// The broker stays unlocked while the authorizer runs.
	let verdict = authorize(
		&shared.authorizer,
		listener,
		client_id.as_deref(),
		Some(peer),
		&packet,
	)
	.await;

	let mut broker = shared.broker.lock().await;
	if let Err(error) = broker.handle_packet(id, packet, verdict, Instant::now()) {
		tracing::debug!(%error, "packet rejected");
	}
	shared.forward_events(&mut broker);
}

async fn write(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
	writer.write_all(bytes).await?;
	writer.flush().await
}
