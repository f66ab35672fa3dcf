//! TCP front end for the speech worker.
//!
//! Each accepted connection is one session served by its own task. `EXT`,
//! a closed connection, or cancellation stops the whole server and sends
//! `Exit` to the speech worker it drives.

use super::protocol::{self, ControlRequest, ParsedLine};
use crate::error::{RelayError, Result};
use crate::speech::SpeechHandle;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a session does after handling one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Reply(String),
    Silent,
    /// Send the reply, then end the session and the server.
    Exit(String),
}

/// Apply one protocol line to the speech worker.
pub async fn handle_line(line: &str, speech: &SpeechHandle, strict: bool) -> SessionAction {
    let request = match protocol::parse_line(line) {
        ParsedLine::Request(request) => request,
        ParsedLine::Invalid(reply) => return SessionAction::Reply(reply),
        ParsedLine::Empty => return SessionAction::Silent,
        ParsedLine::Unknown(token) => {
            debug!(token, "unknown control token");
            return if strict {
                SessionAction::Reply(protocol::unknown_reply(&token))
            } else {
                SessionAction::Silent
            };
        }
    };

    match execute(request, speech).await {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, "speech worker unavailable");
            SessionAction::Reply(format!("Error: {e}"))
        }
    }
}

async fn execute(request: ControlRequest, speech: &SpeechHandle) -> Result<SessionAction> {
    let reply = match request {
        ControlRequest::Exit => {
            speech.exit();
            return Ok(SessionAction::Exit(protocol::REPLY_EXITING.to_owned()));
        }
        ControlRequest::Clear => {
            speech.clear()?;
            protocol::REPLY_CLEARING.to_owned()
        }
        ControlRequest::Speak(text) => {
            speech.speak(text)?;
            protocol::REPLY_MESSAGE_RECEIVED.to_owned()
        }
        ControlRequest::SetVoice(id) => {
            let effective = speech.set_voice_async(id).await?;
            protocol::voice_reply(&effective)
        }
        ControlRequest::GetVoices => protocol::format_voices(&speech.voices_async().await?),
        ControlRequest::SetVolume(volume) => {
            speech.set_volume(volume as f32)?;
            protocol::volume_reply(volume)
        }
        ControlRequest::SetRate(rate) => {
            speech.set_rate(rate as f32)?;
            protocol::rate_reply(rate)
        }
    };
    Ok(SessionAction::Reply(reply))
}

/// Listening control server bound to one speech worker.
pub struct ControlServer {
    listener: TcpListener,
    speech: SpeechHandle,
    strict: bool,
}

impl ControlServer {
    /// Bind to `addr` (e.g. `127.0.0.1:53827`; port 0 picks a free port).
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Io` if the address cannot be bound.
    pub async fn bind(addr: &str, speech: SpeechHandle, strict: bool) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            speech,
            strict,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(RelayError::from)
    }

    /// Accept sessions until one ends or `cancel` fires. Sends `Exit` to
    /// the speech worker on the way out.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let stop = cancel.child_token();
        info!(addr = %self.local_addr()?, strict = self.strict, "control server listening");

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "control client connected");
                        tokio::spawn(serve_session(
                            stream,
                            peer,
                            self.speech.clone(),
                            self.strict,
                            stop.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "failed to accept control connection"),
                },
            }
        }

        self.speech.exit();
        info!("control server stopped");
        Ok(())
    }
}

async fn serve_session(
    stream: TcpStream,
    peer: SocketAddr,
    speech: SpeechHandle,
    strict: bool,
    stop: CancellationToken,
) {
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut writer = BufWriter::new(write);

    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => return,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(%peer, "control client disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "control connection failed");
                break;
            }
        };

        match handle_line(&line, &speech, strict).await {
            SessionAction::Reply(reply) => {
                if let Err(e) = write_line(&mut writer, &reply).await {
                    warn!(%peer, error = %e, "failed to write control reply");
                    break;
                }
            }
            SessionAction::Silent => {}
            SessionAction::Exit(reply) => {
                if let Err(e) = write_line(&mut writer, &reply).await {
                    warn!(%peer, error = %e, "failed to write control reply");
                }
                let _ = writer.shutdown().await;
                info!(%peer, "exit requested");
                break;
            }
        }
    }

    speech.exit();
    stop.cancel();
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::speech::{NullEngine, SpeechEngine, SpeechJob, SpeechService, speech_channel};
    use std::time::Duration;

    #[tokio::test]
    async fn message_is_queued_and_acknowledged() {
        let (speech, jobs, _commands) = speech_channel();
        let action = handle_line("MSG hello world", &speech, false).await;
        assert_eq!(action, SessionAction::Reply("Message received".to_owned()));
        assert_eq!(
            jobs.try_recv().unwrap(),
            SpeechJob::Speak("hello world".to_owned())
        );
    }

    #[tokio::test]
    async fn unknown_tokens_depend_on_strictness() {
        let (speech, _jobs, _commands) = speech_channel();
        assert_eq!(handle_line("HELLO", &speech, false).await, SessionAction::Silent);
        assert_eq!(
            handle_line("HELLO there", &speech, true).await,
            SessionAction::Reply("Unknown command: HELLO".to_owned())
        );
    }

    #[tokio::test]
    async fn bad_input_gets_explicit_reply() {
        let (speech, _jobs, commands) = speech_channel();
        assert_eq!(
            handle_line("VOL up", &speech, false).await,
            SessionAction::Reply("Invalid volume: up".to_owned())
        );
        assert_eq!(
            handle_line("VOC", &speech, false).await,
            SessionAction::Reply("Missing argument for VOC".to_owned())
        );
        assert!(commands.is_empty());
    }

    #[tokio::test]
    async fn voices_query_waits_for_worker_reply() {
        let service = SpeechService::start(
            || Ok(Box::new(NullEngine) as Box<dyn SpeechEngine>),
            Duration::from_millis(1),
        )
        .unwrap();
        let speech = service.handle();
        assert_eq!(
            handle_line("GVC", &speech, false).await,
            SessionAction::Reply("Voices: {}".to_owned())
        );
        assert_eq!(
            handle_line("VOL 1", &speech, false).await,
            SessionAction::Reply("Volume set to 1.0".to_owned())
        );
        assert_eq!(
            handle_line("EXT", &speech, false).await,
            SessionAction::Exit("Exiting...".to_owned())
        );
        tokio::task::spawn_blocking(move || service.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn session_over_tcp_and_exit_stops_server() {
        let (speech, jobs, commands) = speech_channel();
        let server = ControlServer::bind("127.0.0.1:0", speech, false)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run(CancellationToken::new()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut replies = BufReader::new(read).lines();

        write.write_all(b"MSG hi there\nNOPE\nCLR\nEXT\n").await.unwrap();
        assert_eq!(replies.next_line().await.unwrap().unwrap(), "Message received");
        assert_eq!(replies.next_line().await.unwrap().unwrap(), "Clearing queue");
        assert_eq!(replies.next_line().await.unwrap().unwrap(), "Exiting...");
        assert_eq!(replies.next_line().await.unwrap(), None);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(
            jobs.try_iter().collect::<Vec<_>>(),
            vec![
                SpeechJob::Speak("hi there".to_owned()),
                SpeechJob::ClearBoundary(1)
            ]
        );
        let exits = commands
            .try_iter()
            .filter(|c| matches!(c, crate::speech::SpeechCommand::Exit))
            .count();
        assert!(exits >= 1);
    }

    #[tokio::test]
    async fn peer_disconnect_stops_server() {
        let (speech, _jobs, commands) = speech_channel();
        let server = ControlServer::bind("127.0.0.1:0", speech, false)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run(CancellationToken::new()));

        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(
            commands
                .try_iter()
                .any(|c| matches!(c, crate::speech::SpeechCommand::Exit))
        );
    }
}
