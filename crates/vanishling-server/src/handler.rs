use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{ConnectInfo, FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};
use vanishling_journal::{Journal, JournalEntry};
use vanishling_store::{CapacityGuard, ContentStore, StoredObject};
use vanishling_types::{format_ttl, TtlPolicy, TtlSource};

use crate::error::{ServerError, ServerResult};

/// Request header carrying the requested time-to-live.
pub const TTL_HEADER: &str = "x-ttl";

/// Header carrying the hash-id (response on upload, request on download).
pub const FILE_ID_HEADER: &str = "x-file-id";

/// Multipart field holding the upload.
pub const FILE_FIELD: &str = "file";

/// Shared per-process state handed to every handler.
#[derive(Debug)]
pub struct AppState {
    pub store: ContentStore,
    pub journal: Arc<Journal>,
    pub guard: CapacityGuard,
    pub ttl_policy: TtlPolicy,
}

/// Caller address for audit logs: `x-forwarded-for` (first hop), then
/// `x-real-ip`, then the transport peer.
pub fn peer_address(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_owned)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// The single handler behind `/`, dispatching on the HTTP method.
///
/// `POST`/`PUT` upload, `GET` downloads, anything else is a bad request.
pub async fn file_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> ServerResult<Response> {
    let peer = peer_address(request.headers(), connect_info.as_ref());
    match method {
        Method::POST | Method::PUT => upload(state, peer, request).await,
        Method::GET => download(state, peer, request.headers()).await,
        other => Err(ServerError::BadRequest(format!("unsupported method {other}"))),
    }
}

/// Run filesystem work on the blocking pool so a slow write or fsync never
/// stalls the async workers.
async fn blocking<T, F>(work: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}

async fn upload(state: Arc<AppState>, peer: String, request: Request) -> ServerResult<Response> {
    // Refuse before any of the body is read.
    state.guard.admit()?;

    let headers = request.headers().clone();
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| ServerError::BadRequest(rejection.body_text()))?;

    let mut object = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            object = Some(store_field(&state, &peer, field).await?);
            break;
        }
    }
    let object = object
        .ok_or_else(|| ServerError::BadRequest(format!("missing multipart field `{FILE_FIELD}`")))?;

    let requested = headers.get(TTL_HEADER).map(|v| v.to_str().unwrap_or_default());
    let resolved = state.ttl_policy.resolve(requested);
    if resolved.source != TtlSource::Requested && requested.is_some() {
        warn!(%peer, requested = ?requested, source = %resolved.source, "x-ttl ignored; using default");
    }

    // The bytes are durable; a lost journal line only costs this object its expiry.
    let appended = {
        let state = Arc::clone(&state);
        let id = object.id.clone();
        blocking(move || -> ServerResult<JournalEntry> {
            Ok(state.journal.append(resolved.ttl, state.store.root(), &id)?)
        })
        .await
    };
    match appended {
        Ok(entry) => info!(
            %peer,
            file_id = %object.id,
            ttl = %format_ttl(resolved.ttl),
            expires_at = %entry.expires_at,
            "upload accepted"
        ),
        Err(e) => warn!(%peer, file_id = %object.id, error = %e, "journal append failed; file will not expire"),
    }

    let file_id = HeaderValue::from_str(object.id.as_str())
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok((StatusCode::OK, [(FILE_ID_HEADER, file_id)]).into_response())
}

/// Stream one multipart field into the store and publish it.
///
/// Each chunk is written on the blocking pool; the upload moves there and
/// back so the multipart stream is still polled on the async side.
async fn store_field(state: &Arc<AppState>, peer: &str, mut field: Field<'_>) -> ServerResult<StoredObject> {
    let name = field
        .file_name()
        .map(str::to_owned)
        .ok_or_else(|| ServerError::BadRequest("upload has no file name".into()))?;

    let mut upload = {
        let state = Arc::clone(state);
        let peer = peer.to_owned();
        blocking(move || Ok(state.store.begin(&peer, &name)?)).await?
    };
    while let Some(chunk) = field.chunk().await? {
        upload = blocking(move || {
            upload.write(&chunk)?;
            Ok(upload)
        })
        .await?;
    }
    blocking(move || Ok(upload.commit()?)).await
}

async fn download(state: Arc<AppState>, peer: String, headers: &HeaderMap) -> ServerResult<Response> {
    let id = headers
        .get(FILE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| ServerError::BadRequest(format!("missing `{FILE_ID_HEADER}` header")))?;

    let bytes = blocking(move || Ok(state.store.retrieve(&peer, &id)?)).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

/// Liveness probe for `/ping` and `/health`.
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn forwarded_for_wins() {
        let h = headers(&[("x-forwarded-for", "10.0.0.1, 10.0.0.2"), ("x-real-ip", "10.0.0.9")]);
        assert_eq!(peer_address(&h, None), "10.0.0.1");
    }

    #[test]
    fn real_ip_is_second() {
        let h = headers(&[("x-real-ip", "10.0.0.9")]);
        assert_eq!(peer_address(&h, None), "10.0.0.9");
    }

    #[test]
    fn transport_peer_then_unknown() {
        let info = ConnectInfo(SocketAddr::from((Ipv4Addr::new(192, 168, 1, 5), 4242)));
        assert_eq!(peer_address(&HeaderMap::new(), Some(&info)), "192.168.1.5");
        assert_eq!(peer_address(&HeaderMap::new(), None), "unknown");
    }
}
