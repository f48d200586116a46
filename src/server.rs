use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::angles::{AnglePair, AngleStore, Direction};
use crate::camera::{self, Camera};
use crate::http::{self, Request, Response, Status};
use crate::mjpeg;
use crate::snapshot::Snapshots;

const INDEX_PAGE: &str = include_str!("../assets/index.html");

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] http::Error),
    #[error("Connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an MJPEG stream stopped.
#[derive(Debug)]
pub enum StreamClosed {
    ClientDisconnected(std::io::Error),
    CaptureFailed(camera::Error),
}

enum Reply {
    Response(Response),
    Stream,
}

#[derive(Serialize)]
struct AngleReply {
    success: bool,
    #[serde(flatten)]
    angles: AnglePair,
}

#[derive(Serialize)]
struct SnapshotReply {
    success: bool,
    file: String,
}

#[derive(Serialize)]
struct SnapshotListReply {
    success: bool,
    files: Vec<String>,
}

#[derive(Serialize)]
struct ErrorReply {
    success: bool,
    error: String,
}

impl AngleReply {
    fn ok(angles: AnglePair) -> Response {
        Response::json(Status::Ok, &AngleReply { success: true, angles })
    }
}

impl ErrorReply {
    fn with_status(status: Status, error: impl ToString) -> Response {
        Response::json(
            status,
            &ErrorReply {
                success: false,
                error: error.to_string(),
            },
        )
    }
}

/// Web front end: live stream, servo control API and snapshot gallery.
///
/// Every connection is its own task. Handlers share nothing but the angle
/// store, whose operations are atomic, and the read-only camera.
pub struct Server {
    store: Arc<AngleStore>,
    camera: Arc<dyn Camera>,
    snapshots: Snapshots,
    frame_interval: Duration,
    viewers: AtomicUsize,
}

impl Server {
    pub fn new(
        store: Arc<AngleStore>,
        camera: Arc<dyn Camera>,
        snapshots: Snapshots,
        frame_interval: Duration,
    ) -> Self {
        Server {
            store,
            camera,
            snapshots,
            frame_interval,
            viewers: AtomicUsize::new(0),
        }
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    debug!(%peer, "Connection failed: {}", e);
                }
            });
        }
    }

    /// Answers a single request and closes the connection.
    pub async fn handle_connection<S>(&self, stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let request = match http::read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(http::Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                Response::text(Status::BadRequest, "Bad Request\n")
                    .write_to(&mut writer)
                    .await?;
                return Err(e.into());
            }
        };
        debug!(method = %request.method, path = %request.path, "Request");

        match self.route(&request).await {
            Reply::Response(response) => response.write_to(&mut writer).await?,
            Reply::Stream => {
                self.stream_frames(&mut writer).await;
            }
        }
        // the peer may already be gone
        let _ = writer.shutdown().await;
        Ok(())
    }

    async fn route(&self, request: &Request) -> Reply {
        if request.method != "GET" {
            return Reply::Response(Response::text(
                Status::MethodNotAllowed,
                "Method Not Allowed\n",
            ));
        }

        let response = match request.path.as_str() {
            "/" => Response::html(INDEX_PAGE),
            "/video_feed" => return Reply::Stream,
            "/gallery" => self.gallery().await,
            "/api/move" => self.api_move(request).await,
            "/api/reset" => self.api_reset().await,
            "/api/status" => AngleReply::ok(self.store.current().await),
            "/api/snapshot" => self.api_snapshot().await,
            "/api/snapshots" => self.api_snapshots().await,
            path => match path.strip_prefix("/screenshots/") {
                Some(name) => self.screenshot(name).await,
                None => Response::not_found(),
            },
        };
        Reply::Response(response)
    }

    async fn api_move(&self, request: &Request) -> Response {
        let direction = match request.param("dir").unwrap_or_default().parse::<Direction>() {
            Ok(direction) => direction,
            Err(e) => return ErrorReply::with_status(Status::BadRequest, e),
        };

        match self.store.move_direction(direction).await {
            Ok(angles) => AngleReply::ok(angles),
            Err(e) => {
                error!("Move {:?} failed: {}", direction, e);
                ErrorReply::with_status(Status::InternalServerError, e)
            }
        }
    }

    async fn api_reset(&self) -> Response {
        match self.store.park().await {
            Ok(angles) => AngleReply::ok(angles),
            Err(e) => {
                error!("Park failed: {}", e);
                ErrorReply::with_status(Status::InternalServerError, e)
            }
        }
    }

    async fn api_snapshot(&self) -> Response {
        let saved = match self.camera.capture_jpeg().await {
            Ok(frame) => self.snapshots.save(&frame).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match saved {
            Ok(path) => Response::json(
                Status::Ok,
                &SnapshotReply {
                    success: true,
                    file: path.display().to_string(),
                },
            ),
            Err(e) => {
                warn!("Snapshot failed: {}", e);
                ErrorReply::with_status(Status::InternalServerError, e)
            }
        }
    }

    async fn api_snapshots(&self) -> Response {
        match self.snapshots.list().await {
            Ok(files) => Response::json(
                Status::Ok,
                &SnapshotListReply {
                    success: true,
                    files,
                },
            ),
            Err(e) => ErrorReply::with_status(Status::InternalServerError, e),
        }
    }

    async fn gallery(&self) -> Response {
        let names = match self.snapshots.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list snapshots: {}", e);
                return Response::text(Status::InternalServerError, "Gallery unavailable\n");
            }
        };

        let mut page = String::from(
            "<!DOCTYPE html>\n<html><head><title>Snapshots</title>\
             <style>body{background:#222;color:white;font-family:sans-serif;text-align:center}\
             img{width:320px;margin:6px;border:2px solid #555}a{color:#8cf}</style></head>\
             <body><h1>Snapshots</h1><p><a href=\"/\">Back to live feed</a></p>\n",
        );
        if names.is_empty() {
            page.push_str("<p>No snapshots yet.</p>\n");
        }
        for name in &names {
            let _ = writeln!(
                page,
                "<a href=\"/screenshots/{name}\"><img src=\"/screenshots/{name}\" alt=\"{name}\"></a>"
            );
        }
        page.push_str("</body></html>\n");
        Response::html(page)
    }

    async fn screenshot(&self, name: &str) -> Response {
        match self.snapshots.read(name).await {
            Ok(Some(data)) => Response::jpeg(data),
            Ok(None) => Response::not_found(),
            Err(e) => {
                warn!("Failed to read snapshot {}: {}", name, e);
                Response::text(Status::InternalServerError, "Snapshot unavailable\n")
            }
        }
    }

    /// Sends frames until the client goes away or the camera fails. Neither
    /// case affects other connections.
    pub async fn stream_frames<W>(&self, writer: &mut W) -> StreamClosed
    where
        W: AsyncWrite + Unpin,
    {
        let viewers = self.viewers.fetch_add(1, Ordering::SeqCst) + 1;
        info!(viewers, "Stream client connected");

        let closed = self.pump_frames(writer).await;

        let viewers = self.viewers.fetch_sub(1, Ordering::SeqCst) - 1;
        match &closed {
            StreamClosed::ClientDisconnected(e) => {
                info!(viewers, "Stream client disconnected: {}", e)
            }
            StreamClosed::CaptureFailed(e) => warn!(viewers, "Stream closed, capture failed: {}", e),
        }
        closed
    }

    async fn pump_frames<W>(&self, writer: &mut W) -> StreamClosed
    where
        W: AsyncWrite + Unpin,
    {
        if let Err(e) = http::write_stream_head(writer, mjpeg::CONTENT_TYPE).await {
            return StreamClosed::ClientDisconnected(e);
        }

        loop {
            let frame = match self.camera.capture_jpeg().await {
                Ok(frame) => frame,
                Err(e) => return StreamClosed::CaptureFailed(e),
            };

            let part = mjpeg::part(&frame);
            if let Err(e) = write_part(writer, &part).await {
                return StreamClosed::ClientDisconnected(e);
            }
            tokio::time::sleep(self.frame_interval).await;
        }
    }
}

async fn write_part<W>(writer: &mut W, part: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(part).await?;
    writer.flush().await
}
