//! TCP socket for the hardware helper.
//!
//! The helper that owns the GPIO buttons, the LED bar and the SPI display
//! connects here.  It sends `Button { pin }` / `Command` requests and receives
//! every render, LED effect and backlight change as a framed broadcast.
use piradio_core::config::ButtonConfig;
use piradio_core::controller::Controller;
use piradio_core::protocol::{Broadcast, FrameError, Message, Request, PROTOCOL_VERSION};
use piradio_core::render::RenderEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Clone)]
pub struct SocketContext {
    pub controller: Arc<Controller>,
    pub buttons: ButtonConfig,
    pub render_tx: broadcast::Sender<RenderEvent>,
    pub log_tx: broadcast::Sender<String>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    ctx: SocketContext,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, ctx).await;
    })
}

async fn serve(listener: TcpListener, ctx: SocketContext) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
                info!("Client {} connected from {}", id, peer);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_client(stream, id, ctx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, client_id: usize, ctx: SocketContext) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut render_rx = ctx.render_tx.subscribe();
    let mut log_rx = ctx.log_tx.subscribe();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: ctx.controller.status().await,
    };
    if send(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        if drain_requests(&mut read_buf, client_id, &ctx, &mut write_half).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            event = render_rx.recv() => {
                let broadcast = match event {
                    Ok(RenderEvent::State(data)) => Broadcast::State { data },
                    Ok(RenderEvent::Effect(effect)) => Broadcast::Effect { effect },
                    Ok(RenderEvent::Backlight(on)) => Broadcast::Backlight { on },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} render events", client_id, n);
                        Broadcast::State { data: ctx.controller.status().await }
                    }
                    Err(_) => break,
                };
                if send(&mut write_half, broadcast).await.is_err() {
                    break;
                }
            }

            message = log_rx.recv() => {
                match message {
                    Ok(message) => {
                        let _ = send(&mut write_half, Broadcast::Log { message }).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(_) => break,
                }
            }
        }
    }
}

/// Handle every complete frame in `read_buf`.  Errors only when the client
/// can no longer be written to or sent an unrecoverable frame.
async fn drain_requests(
    read_buf: &mut Vec<u8>,
    client_id: usize,
    ctx: &SocketContext,
    write_half: &mut OwnedWriteHalf,
) -> anyhow::Result<()> {
    loop {
        match Message::decode(read_buf) {
            Ok(None) => return Ok(()),
            Ok(Some((msg, consumed))) => {
                read_buf.drain(..consumed);
                if let Message::Request(request) = msg {
                    handle_request(request, client_id, ctx, write_half).await?;
                }
            }
            Err(FrameError::Malformed { consumed, source }) => {
                warn!("Client {} sent a malformed frame: {}", client_id, source);
                read_buf.drain(..consumed);
            }
            Err(e @ FrameError::TooLarge(_)) => {
                warn!("Client {}: {}, dropping connection", client_id, e);
                anyhow::bail!(e);
            }
        }
    }
}

async fn handle_request(
    request: Request,
    client_id: usize,
    ctx: &SocketContext,
    write_half: &mut OwnedWriteHalf,
) -> anyhow::Result<()> {
    let command = match request {
        Request::Command { command } => command,
        Request::Button { pin } => match ctx.buttons.command_for(pin) {
            Some(command) => command,
            None => {
                warn!("Client {} pressed unmapped pin {}", client_id, pin);
                return Ok(());
            }
        },
        Request::GetState => {
            let data = ctx.controller.status().await;
            return send(write_half, Broadcast::State { data }).await;
        }
    };

    info!("Client {} sent command: {:?}", client_id, command);
    // The resulting state reaches every client through the render channel.
    if let Err(e) = ctx.controller.apply(command).await {
        warn!("Client {} command rejected: {}", client_id, e);
        send(
            write_half,
            Broadcast::Error {
                message: e.to_string(),
            },
        )
        .await?;
    }
    Ok(())
}

async fn send(write_half: &mut OwnedWriteHalf, broadcast: Broadcast) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use piradio_core::config::Config;
    use piradio_core::engine::NullEngine;
    use piradio_core::protocol::{Command, Station};
    use piradio_core::render::ChannelRenderer;

    async fn read_broadcast(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Broadcast {
        loop {
            if let Some((msg, consumed)) = Message::decode(buf).unwrap() {
                buf.drain(..consumed);
                match msg {
                    Message::Broadcast(Broadcast::Log { .. }) => continue,
                    Message::Broadcast(b) => return b,
                    Message::Request(r) => panic!("unexpected request {:?}", r),
                }
            }
            let mut tmp = [0u8; 1024];
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "daemon closed the socket");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    async fn write_request(stream: &mut TcpStream, request: Request) {
        let encoded = Message::Request(request).encode().unwrap();
        stream.write_all(&encoded).await.unwrap();
    }

    async fn start() -> (TcpStream, Arc<Controller>) {
        let mut config = Config::default();
        config.engine.settle_delay_ms = 0;
        config.stations = vec![
            Station::new("One", "http://one.test/"),
            Station::new("Two", "http://two.test/"),
        ];

        let (render_tx, _) = broadcast::channel(64);
        let (log_tx, _) = broadcast::channel(64);
        let controller = Arc::new(Controller::new(
            &config,
            Arc::new(NullEngine),
            Arc::new(ChannelRenderer::new(render_tx.clone())),
        ));
        let ctx = SocketContext {
            controller: controller.clone(),
            buttons: config.buttons.clone(),
            render_tx,
            log_tx,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, ctx));
        (TcpStream::connect(addr).await.unwrap(), controller)
    }

    #[tokio::test]
    async fn hello_then_button_press_broadcasts_effect_and_state() {
        let (mut stream, controller) = start().await;
        let mut buf = Vec::new();

        match read_broadcast(&mut stream, &mut buf).await {
            Broadcast::Hello {
                protocol_version,
                state,
            } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.label, "One");
            }
            other => panic!("expected hello, got {:?}", other),
        }

        // Pin 5 is fast-forward.
        write_request(&mut stream, Request::Button { pin: 5 }).await;

        match read_broadcast(&mut stream, &mut buf).await {
            Broadcast::Effect { .. } => {}
            other => panic!("expected effect, got {:?}", other),
        }
        match read_broadcast(&mut stream, &mut buf).await {
            Broadcast::State { data } => assert_eq!(data.label, "Two"),
            other => panic!("expected state, got {:?}", other),
        }
        assert_eq!(controller.status().await.station_index, 1);
    }

    #[tokio::test]
    async fn rejected_command_returns_error() {
        let (mut stream, _controller) = start().await;
        let mut buf = Vec::new();
        read_broadcast(&mut stream, &mut buf).await;

        write_request(
            &mut stream,
            Request::Command {
                command: Command::SetTimerInterval { minutes: 0 },
            },
        )
        .await;
        match read_broadcast(&mut stream, &mut buf).await {
            Broadcast::Error { message } => assert!(message.contains("invalid input")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (mut stream, _controller) = start().await;
        let mut buf = Vec::new();
        read_broadcast(&mut stream, &mut buf).await;

        let garbage = b"{oops";
        let mut frame = (garbage.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(garbage);
        stream.write_all(&frame).await.unwrap();

        write_request(&mut stream, Request::GetState).await;
        match read_broadcast(&mut stream, &mut buf).await {
            Broadcast::State { data } => assert_eq!(data.label, "One"),
            other => panic!("expected state, got {:?}", other),
        }
    }
}
