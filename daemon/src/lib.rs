//! HTTP routes of the local daemon, kept free of the socket so they can be
//! exercised directly.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tiny_http::Method;

use laserpresets_core::bridge::{lock, AckRequest, HostEvent};
use laserpresets_core::{Controller, PresetError};

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub json: bool,
}

impl Reply {
    pub fn text(status: u16, body: &str) -> Self {
        Reply {
            status,
            body: body.to_string(),
            json: false,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Reply {
                status: 200,
                body,
                json: true,
            },
            Err(e) => Reply::text(500, &e.to_string()),
        }
    }

    pub fn no_content() -> Self {
        Reply::text(204, "")
    }
}

fn error_reply(e: &PresetError) -> Reply {
    let status = match e {
        PresetError::NotFound(_) => 404,
        PresetError::Json(_) | PresetError::Validation(_) => 400,
        PresetError::ChannelFull(_) | PresetError::QuotaExceeded { .. } => 503,
        _ => 500,
    };
    Reply::text(status, &e.to_string())
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, PresetError> {
    Ok(serde_json::from_str(body)?)
}

/// Answer one request against the editor state.
pub fn route(controller: &mut Controller, method: &Method, url: &str, body: &str) -> Reply {
    if *method == Method::Options {
        return Reply::no_content();
    }

    match handle(controller, method, url, body) {
        Ok(reply) => reply,
        Err(e) => {
            log::error!("{} {} failed: {}", method, url, e);
            error_reply(&e)
        }
    }
}

fn handle(
    controller: &mut Controller,
    method: &Method,
    url: &str,
    body: &str,
) -> Result<Reply, PresetError> {
    let path = url.split('?').next().unwrap_or(url);

    match (method, path) {
        (Method::Get, "/health") => Ok(Reply::text(200, "ok")),

        // Page-script poll. The request body is informational only.
        (Method::Post, "/material-check") => {
            let response = lock(controller.background())?.material_check()?;
            Ok(Reply::json(&response))
        }

        (Method::Post, "/force-refresh") => {
            lock(controller.background())?.force_refresh()?;
            Ok(Reply::json(&json!({"ok": true})))
        }

        (Method::Post, "/ack") => {
            let request: AckRequest = parse(body)?;
            let acked = lock(controller.background())?.ack(&request.seqs);
            Ok(Reply::json(&json!({ "acked": acked })))
        }

        (Method::Post, "/events") => {
            let event: HostEvent = parse(body)?;
            let seq = lock(controller.background())?.post_event(event)?;
            // Handle it now rather than on the next scheduled tick.
            controller.tick(Utc::now())?;
            Ok(Reply::json(&json!({ "seq": seq })))
        }

        (Method::Get, "/materials") => Ok(Reply::json(&controller.catalog().formatted())),

        (Method::Get, p) if p.starts_with("/materials/") => {
            let title = urlencoding::decode(&p["/materials/".len()..])
                .map_err(|e| PresetError::Validation(format!("Invalid title: {}", e)))?
                .into_owned();
            match controller.catalog().find_by_title(&title) {
                Some(preset) => Ok(Reply::json(&preset.raw)),
                None => Err(PresetError::NotFound(title)),
            }
        }

        (Method::Get, "/cloud") => {
            let view = controller.snapshot();
            Ok(Reply::json(&json!({
                "bytesInUse": view.cloud_bytes_used,
                "quota": view.cloud_quota,
                "lastSync": view.last_cloud_sync,
            })))
        }

        (Method::Post, "/backup") => {
            let name = controller.create_backup(Utc::now())?;
            Ok(Reply::json(&json!({ "name": name })))
        }

        _ => Ok(Reply::text(404, "Not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laserpresets_core::bridge::Background;
    use laserpresets_core::config::DEFAULT_CLOUD_QUOTA;
    use laserpresets_core::{CloudMirror, LocalStore};

    fn controller() -> Controller {
        let store = LocalStore::in_memory();
        let background = Background::shared(store.clone(), 4);
        Controller::new(store, CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA), background)
    }

    #[test]
    fn test_preflight_and_unknown_route() {
        let mut c = controller();
        assert_eq!(route(&mut c, &Method::Options, "/ack", "").status, 204);
        assert_eq!(route(&mut c, &Method::Get, "/nothing", "").status, 404);
        assert_eq!(route(&mut c, &Method::Get, "/health?x=1", "").body, "ok");
    }

    #[test]
    fn test_bad_body_is_client_error() {
        let mut c = controller();
        assert_eq!(route(&mut c, &Method::Post, "/ack", "not json").status, 400);
        assert_eq!(
            route(&mut c, &Method::Post, "/events", r#"{"type":"nope"}"#).status,
            400
        );
    }

    #[test]
    fn test_posted_events_do_not_fill_the_channel() {
        let mut c = controller();
        for _ in 0..4 {
            assert_eq!(
                route(&mut c, &Method::Post, "/events", r#"{"type":"clone"}"#).status,
                200
            );
        }
        // Events are drained by the tick that follows each post.
        assert_eq!(
            route(&mut c, &Method::Post, "/events", r#"{"type":"clone"}"#).status,
            200
        );
    }
}
