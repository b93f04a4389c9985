use axum::{
    extract::Path,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use beam_transcode::{
    packet::Packet,
    rational::Rational,
    source::{PacketStore, RetrieveRequest},
    stream::{StreamDescriptor, VideoParams},
};
use serde_json::json;
use tokio::net::TcpListener;

use super::HttpStore;

const TB: Rational = Rational::new(1, 25);

async fn format(Path(url): Path<String>) -> Result<Json<serde_json::Value>, StatusCode> {
    if url != "file:clip.mxf" {
        return Err(StatusCode::NOT_FOUND);
    }
    let stream = StreamDescriptor::video(
        0,
        "h264",
        TB,
        VideoParams {
            width: 1920,
            height: 1080,
            pixel_format: "yuv420p".to_string(),
            sample_aspect_ratio: None,
            frame_rate: Some(Rational::new(25, 1)),
        },
    );
    Ok(Json(json!({ "streams": [stream] })))
}

async fn packets(
    Path((_url, stream, range)): Path<(String, String, String)>,
) -> Result<Json<Vec<Packet>>, StatusCode> {
    if stream != "stream_0" {
        return Err(StatusCode::NOT_FOUND);
    }
    // "1s-2s" at 25 fps
    let start: i64 = range
        .split('s')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let packets = (start * 25..start * 25 + 25)
        .map(|pts| Packet::new(0, pts, TB, Vec::new()).with_key(pts % 25 == 0))
        .collect();
    Ok(Json(packets))
}

async fn payload(
    Path((_url, _stream, packet)): Path<(String, String, String)>,
) -> Result<Vec<u8>, StatusCode> {
    let pts: u8 = packet
        .strip_prefix("packet_")
        .and_then(|pts| pts.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    Ok(vec![pts; 4])
}

async fn serve() -> String {
    let app = Router::new()
        .route("/beams/{url}", get(format))
        .route("/beams/{url}/{stream}/{range}", get(packets))
        .route("/beams/{url}/{stream}/{packet}/data", get(payload));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_store_format() {
    let store = HttpStore::new(&serve().await).unwrap();
    let streams = store.format("file:clip.mxf").await.unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].time_base, TB);
    assert!(streams[0].is_video());
    assert!(store.format("file:missing.mxf").await.is_err());
}

#[tokio::test]
async fn test_http_store_retrieve_fetches_payloads() {
    let store = HttpStore::new(&serve().await).unwrap();
    let request = RetrieveRequest {
        url: "file:clip.mxf".to_string(),
        stream_index: 0,
        window: "1s-2s".parse().unwrap(),
        flags: 0,
    };
    let packets = store.retrieve(&request).await.unwrap();
    assert_eq!(packets.len(), 25);
    assert_eq!(packets[0].pts, Some(25));
    assert!(packets[0].is_key);
    assert_eq!(packets[3].data.as_ref(), &[28u8; 4]);

    let missing = RetrieveRequest {
        stream_index: 3,
        ..request
    };
    assert!(store.retrieve(&missing).await.is_err());
}

#[test]
fn test_http_store_rejects_bad_base() {
    assert!(HttpStore::new("not a url").is_err());
    assert!(HttpStore::new("mailto:someone@example.com").is_err());
}
