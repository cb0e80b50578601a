//! Named device operations on top of [`CastConnection`].
//!
//! Receiver commands go to `receiver-0` on the receiver namespace.
//! Media commands and application messages go to the running
//! application's transport id; the connection performs the session
//! handshake for those destinations on first use.

use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::connection::CastConnection;
use crate::dispatch::{ConnectionEvent, ListenerId, ListenerResult, SpontaneousEvent};
use crate::error::CastError;
use crate::message::{Request, RequestBody, Response, ResponseBody};
use crate::model::{Application, Media, MediaStatus, Status, Volume};
use crate::namespace::{DEFAULT_RECEIVER_ID, NS_MEDIA, NS_RECEIVER};

const APP_AVAILABLE: &str = "APP_AVAILABLE";

fn unexpected(expected: &'static str, response: &Response) -> CastError {
    CastError::UnexpectedResponse {
        expected,
        actual: response.describe().to_owned(),
    }
}

fn into_status(response: Response) -> Result<Status, CastError> {
    match response {
        Response::Standard {
            body: ResponseBody::ReceiverStatus { status },
            ..
        } => Ok(status),
        other => Err(unexpected("RECEIVER_STATUS", &other)),
    }
}

fn into_media_status(response: Response) -> Result<Option<MediaStatus>, CastError> {
    match response {
        Response::Standard {
            body: ResponseBody::MediaStatus { status },
            ..
        } => Ok(status.into_iter().next()),
        other => Err(unexpected("MEDIA_STATUS", &other)),
    }
}

/// One cast device.
#[derive(Debug, Clone)]
pub struct CastDevice {
    connection: CastConnection,
}

impl CastDevice {
    pub fn new(config: ConnectionConfig) -> Result<Self, CastError> {
        Ok(Self::from_connection(CastConnection::new(config)?))
    }

    pub fn from_connection(connection: CastConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &CastConnection {
        &self.connection
    }

    // ── Connection ───────────────────────────────────────────────

    /// Open the connection unless it is already open.
    pub async fn connect(&self) -> Result<(), CastError> {
        match self.connection.open().await {
            Ok(()) | Err(CastError::AlreadyOpen) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close the connection if it is open.
    pub async fn disconnect(&self) -> Result<(), CastError> {
        match self.connection.close().await {
            Ok(()) | Err(CastError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    // ── Receiver ─────────────────────────────────────────────────

    async fn receiver_request(&self, body: RequestBody) -> Result<Response, CastError> {
        self.connection
            .request(NS_RECEIVER, DEFAULT_RECEIVER_ID, body)
            .await
    }

    pub async fn status(&self) -> Result<Status, CastError> {
        into_status(self.receiver_request(RequestBody::GetStatus).await?)
    }

    pub async fn running_app(&self) -> Result<Option<Application>, CastError> {
        Ok(self.status().await?.applications.into_iter().next())
    }

    async fn require_running_app(&self) -> Result<Application, CastError> {
        self.running_app()
            .await?
            .ok_or(CastError::NoRunningApplication)
    }

    pub async fn is_app_available(&self, app_id: &str) -> Result<bool, CastError> {
        let response = self
            .receiver_request(RequestBody::GetAppAvailability {
                app_id: vec![app_id.to_owned()],
            })
            .await?;
        match response {
            Response::Standard {
                body: ResponseBody::GetAppAvailability { availability },
                ..
            } => Ok(availability.get(app_id).map(String::as_str) == Some(APP_AVAILABLE)),
            other => Err(unexpected("GET_APP_AVAILABILITY", &other)),
        }
    }

    pub async fn is_app_running(&self, app_id: &str) -> Result<bool, CastError> {
        Ok(self.status().await?.is_app_running(app_id))
    }

    /// Launch `app_id`; returns the application now in the foreground.
    pub async fn launch_app(&self, app_id: &str) -> Result<Option<Application>, CastError> {
        let response = self
            .receiver_request(RequestBody::Launch {
                app_id: app_id.to_owned(),
            })
            .await?;
        Ok(into_status(response)?.applications.into_iter().next())
    }

    /// Stop the running application.
    pub async fn stop_app(&self) -> Result<Option<Status>, CastError> {
        let app = self.require_running_app().await?;
        self.stop_session(&app.session_id).await
    }

    /// Stop a session. Receivers usually answer with a fresh status.
    pub async fn stop_session(&self, session_id: &str) -> Result<Option<Status>, CastError> {
        let response = self
            .receiver_request(RequestBody::Stop {
                session_id: session_id.to_owned(),
            })
            .await?;
        Ok(into_status(response).ok())
    }

    // ── Volume ───────────────────────────────────────────────────

    pub async fn set_volume(&self, level: f32) -> Result<Status, CastError> {
        into_status(
            self.receiver_request(RequestBody::SetVolume {
                volume: Volume::level(level),
            })
            .await?,
        )
    }

    /// Walk the volume to `level` one receiver-sized step at a time.
    /// Receivers reject large jumps.
    pub async fn set_volume_by_increment(&self, level: f32) -> Result<(), CastError> {
        let volume = self
            .status()
            .await?
            .volume
            .ok_or(CastError::InvalidState("receiver reported no volume"))?;
        if volume.increment <= 0.0 {
            return Err(CastError::InvalidState("volume increment is not positive"));
        }

        let target = level.clamp(0.0, 1.0);
        let mut total = volume.level.unwrap_or(0.0);
        while total < target {
            total = (total + volume.increment).min(target);
            self.set_volume(total).await?;
        }
        while total > target {
            total = (total - volume.increment).max(target);
            self.set_volume(total).await?;
        }
        Ok(())
    }

    pub async fn set_muted(&self, muted: bool) -> Result<Status, CastError> {
        into_status(
            self.receiver_request(RequestBody::SetVolume {
                volume: Volume::muted(muted),
            })
            .await?,
        )
    }

    // ── Media ────────────────────────────────────────────────────

    async fn media_request(
        &self,
        app: &Application,
        body: RequestBody,
    ) -> Result<Option<MediaStatus>, CastError> {
        let response = self
            .connection
            .request(NS_MEDIA, app.transport_id(), body)
            .await?;
        into_media_status(response)
    }

    /// Status of the running application's current media session.
    pub async fn media_status(&self) -> Result<Option<MediaStatus>, CastError> {
        let app = self.require_running_app().await?;
        self.media_request(&app, RequestBody::GetStatus).await
    }

    async fn active_media(&self, op: &'static str) -> Result<(Application, u64), CastError> {
        let app = self.require_running_app().await?;
        let status = self
            .media_request(&app, RequestBody::GetStatus)
            .await?
            .ok_or(CastError::InvalidState(op))?;
        Ok((app, status.media_session_id))
    }

    pub async fn play(&self) -> Result<Option<MediaStatus>, CastError> {
        let (app, media_session_id) = self.active_media("no media session to resume").await?;
        let body = RequestBody::Play {
            session_id: app.session_id.clone(),
            media_session_id,
        };
        self.media_request(&app, body).await
    }

    pub async fn pause(&self) -> Result<Option<MediaStatus>, CastError> {
        let (app, media_session_id) = self.active_media("no media session to pause").await?;
        let body = RequestBody::Pause {
            session_id: app.session_id.clone(),
            media_session_id,
        };
        self.media_request(&app, body).await
    }

    /// Move playback to `current_time` seconds.
    pub async fn seek(&self, current_time: f64) -> Result<Option<MediaStatus>, CastError> {
        let (app, media_session_id) = self.active_media("no media session to seek").await?;
        let body = RequestBody::Seek {
            session_id: app.session_id.clone(),
            media_session_id,
            current_time,
        };
        self.media_request(&app, body).await
    }

    /// Load `media` into the running application and start playing.
    pub async fn load(&self, media: Media) -> Result<Option<MediaStatus>, CastError> {
        let app = self.require_running_app().await?;
        let body = RequestBody::Load {
            session_id: app.session_id.clone(),
            media,
            autoplay: true,
            current_time: 0.0,
            custom_data: None,
        };
        self.media_request(&app, body).await
    }

    // ── Application messages ─────────────────────────────────────

    /// Send a custom payload to the running application and wait for
    /// its reply.
    pub async fn send_app_request(
        &self,
        namespace: &str,
        payload: Value,
    ) -> Result<Response, CastError> {
        let app = self.require_running_app().await?;
        self.connection
            .request(namespace, app.transport_id(), Request::Custom(payload))
            .await
    }

    /// Send a custom payload to the running application without waiting.
    pub async fn send_app_message(&self, namespace: &str, payload: Value) -> Result<(), CastError> {
        let app = self.require_running_app().await?;
        self.connection
            .notify(namespace, app.transport_id(), Request::Custom(payload))
            .await
    }

    // ── Listeners ────────────────────────────────────────────────

    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SpontaneousEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.connection.events().on_spontaneous(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.connection.events().remove_spontaneous(id)
    }

    pub fn on_connection<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.connection.events().on_connection(listener)
    }

    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.connection.events().remove_connection(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_extraction() {
        let r = Response::parse(r#"{"type":"RECEIVER_STATUS","requestId":1,"status":{}}"#).unwrap();
        assert!(into_status(r).is_ok());

        let r = Response::parse(r#"{"type":"MEDIA_STATUS","requestId":1,"status":[]}"#).unwrap();
        match into_status(r) {
            Err(CastError::UnexpectedResponse { expected, actual }) => {
                assert_eq!(expected, "RECEIVER_STATUS");
                assert_eq!(actual, "MEDIA_STATUS");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_media_status_is_none() {
        let r = Response::parse(r#"{"type":"MEDIA_STATUS","status":[]}"#).unwrap();
        assert_eq!(into_media_status(r).unwrap(), None);
    }
}
