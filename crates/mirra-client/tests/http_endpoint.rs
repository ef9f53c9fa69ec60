use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use mirra_client::{
    CatalogClient, ClientConfig, DummyCamera, DummySignaling, DummyTransportFactory,
    HttpSignaling, ParameterStore, Session, SignalingEndpoint,
};
use mirra_common::{Category, Color, Error, MakeupParams, OfferRequest, Region, SdpKind};
use mirra_media::{FrameSource, Resolution, SolidColorSource};

#[derive(Clone, Copy, Default, PartialEq)]
enum Mode {
    #[default]
    Healthy,
    WrongAnswer,
    Broken,
    Slow,
}

#[derive(Clone, Default)]
struct Endpoint {
    mode: Mode,
    offers: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

async fn offer(State(endpoint): State<Endpoint>, Json(body): Json<Value>) -> Response {
    endpoint.offers.lock().expect("offers").push(body);
    match endpoint.mode {
        Mode::Slow => {
            tokio::time::sleep(Duration::from_millis(600)).await;
            Json(json!({ "sdp": "v=0\r\ns=late\r\n", "type": "answer" })).into_response()
        }
        Mode::Healthy => Json(json!({ "sdp": "v=0\r\ns=answer\r\n", "type": "answer" })).into_response(),
        Mode::WrongAnswer => Json(json!({ "sdp": "v=0\r\n", "type": "offer" })).into_response(),
        Mode::Broken => (StatusCode::INTERNAL_SERVER_ERROR, "renderer crashed").into_response(),
    }
}

async fn unique_shades(State(endpoint): State<Endpoint>) -> Json<Value> {
    if endpoint.mode == Mode::Broken {
        return Json(json!({ "error": "catalog database offline" }));
    }
    Json(json!({
        "Lipstick": ["#c21e56", "#aa0a1e"],
        "Eyebrow": [],
        "Eyeliner": ["#101010"],
        "Eyeshadow": ["#8e4585", "bogus"],
        "Blush": ["#e75480"],
        "Foundation": ["#f3cfb3"],
        "Mascara": ["#000000"]
    }))
}

async fn products(Json(body): Json<Value>) -> Json<Value> {
    let lip = body["selectedMakeup"]["LIP_UPPER"].as_str().unwrap_or_default().to_string();
    Json(json!({
        "products": {
            "Lipstick": [{ "name": "Velvet Matte", "brand": "Acme", "hex": lip }],
            "Blush": []
        }
    }))
}

async fn beautify(State(endpoint): State<Endpoint>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.expect("field bytes").to_vec();
        endpoint.uploads.lock().expect("uploads").push((file_name, data));
        return Json(json!({
            "skin_tone": "medium",
            "filter": {
                "Lipstick": "#B5485D",
                "Eyeliner": "#1A1A1A",
                "Eyeshadow": "#7A4E6B",
                "Eyebrow": "#222222",
                "Blush": "#E8846B",
                "Foundation": "#D9B38C"
            }
        }))
        .into_response();
    }
    (StatusCode::BAD_REQUEST, "missing file field").into_response()
}

async fn serve(endpoint: Endpoint) -> ClientConfig {
    let app = Router::new()
        .route("/offer", post(offer))
        .route("/unique_shades", get(unique_shades))
        .route("/products", post(products))
        .route("/beautify", post(beautify))
        .with_state(endpoint);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    ClientConfig {
        endpoint: format!("http://{}/", addr),
        http_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_http_signaling_posts_offer_with_makeup() {
    let endpoint = Endpoint::default();
    let config = serve(endpoint.clone()).await;
    let signaling = HttpSignaling::new(&config).expect("client");

    let mut params = MakeupParams::default();
    params.blend_intensity = mirra_common::Intensity::new(0.6);
    let answer = signaling
        .negotiate(OfferRequest::new("v=0\r\ns=offer\r\n".into(), params))
        .await
        .expect("answer");
    assert_eq!(answer.kind, SdpKind::Answer);
    assert!(answer.sdp.contains("s=answer"));

    let offers = endpoint.offers.lock().expect("offers").clone();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["type"], "offer");
    assert_eq!(offers[0]["makeup"]["blendIntensity"].as_f64().map(|v| (v * 10.0).round()), Some(6.0));
    let selected = offers[0]["makeup"]["selectedMakeup"]
        .as_object()
        .expect("selectedMakeup object");
    assert_eq!(selected.len(), Region::COUNT);
    assert_eq!(selected["LIP_UPPER"], "#AA0A1E");
}

#[tokio::test]
async fn test_http_signaling_rejects_bad_answers() {
    let config = serve(Endpoint {
        mode: Mode::WrongAnswer,
        ..Endpoint::default()
    })
    .await;
    let signaling = HttpSignaling::new(&config).expect("client");
    let result = signaling
        .negotiate(OfferRequest::new("v=0".into(), MakeupParams::default()))
        .await;
    assert!(matches!(result, Err(Error::Negotiation(_))));

    let config = serve(Endpoint {
        mode: Mode::Broken,
        ..Endpoint::default()
    })
    .await;
    let signaling = HttpSignaling::new(&config).expect("client");
    let result = signaling
        .negotiate(OfferRequest::new("v=0".into(), MakeupParams::default()))
        .await;
    match result {
        Err(Error::Negotiation(msg)) => assert!(msg.contains("500")),
        other => panic!("expected negotiation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_answer_outlasts_http_timeout() {
    let config = serve(Endpoint {
        mode: Mode::Slow,
        ..Endpoint::default()
    })
    .await;
    let config = ClientConfig {
        http_timeout: Duration::from_millis(200),
        ..config
    };
    let signaling = HttpSignaling::new(&config).expect("client");
    let answer = signaling
        .negotiate(OfferRequest::new("v=0".into(), MakeupParams::default()))
        .await
        .expect("late answer");
    assert!(answer.sdp.contains("s=late"));

    let bounded = ClientConfig {
        negotiation_timeout: Some(Duration::from_millis(200)),
        ..config
    };
    let signaling = HttpSignaling::new(&bounded).expect("client");
    let result = signaling
        .negotiate(OfferRequest::new("v=0".into(), MakeupParams::default()))
        .await;
    assert!(matches!(result, Err(Error::Negotiation(_))));
}

#[tokio::test]
async fn test_catalog_shades_and_products() {
    let config = serve(Endpoint::default()).await;
    let catalog = CatalogClient::new(&config).expect("client");

    let shades = catalog.fetch_unique_shades().await.expect("shades");
    assert_eq!(shades.get(Category::Lip)[0], Color::rgb(0xC2, 0x1E, 0x56));
    assert!(shades.get(Category::Eyebrow).is_empty());
    assert_eq!(shades.get(Category::Eyeshadow).len(), 1);

    let params = MakeupParams::default().selected_makeup;
    let recommendations = catalog
        .fetch_product_recommendations(&params)
        .await
        .expect("products");
    let lipsticks = &recommendations.products["Lipstick"];
    assert_eq!(lipsticks[0].name(), Some("Velvet Matte"));
    assert_eq!(lipsticks[0].brand(), Some("Acme"));
    assert_eq!(lipsticks[0].0["hex"], "#AA0A1E");
}

#[tokio::test]
async fn test_catalog_error_body_is_http_error() {
    let config = serve(Endpoint {
        mode: Mode::Broken,
        ..Endpoint::default()
    })
    .await;
    let catalog = CatalogClient::new(&config).expect("client");
    assert!(matches!(
        catalog.fetch_unique_shades().await,
        Err(Error::Http(_))
    ));
}

#[tokio::test]
async fn test_analyze_still_uploads_png() {
    let endpoint = Endpoint::default();
    let config = serve(endpoint.clone()).await;
    let catalog = CatalogClient::new(&config).expect("client");

    let still = mirra_media::FallbackFrameCapture::capture(&SolidColorSource::new(
        Resolution::new(16, 16),
        [200, 150, 120],
    ))
    .expect("still");
    let suggestion = catalog.analyze_still_image(&still.png).await.expect("suggestion");
    assert_eq!(suggestion.skin_tone, "medium");
    assert_eq!(suggestion.filter.eyebrow, Some(Color::rgb(0x22, 0x22, 0x22)));

    let uploads = endpoint.uploads.lock().expect("uploads").clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "capture.png");
    assert_eq!(&uploads[0].1[..8], b"\x89PNG\r\n\x1a\n");
}

#[tokio::test]
async fn test_session_seeds_shades_and_beautifies() {
    let config = serve(Endpoint::default()).await;
    let store = ParameterStore::default();
    let factory = DummyTransportFactory::default();
    let session = Session::new(
        config.clone(),
        Arc::new(factory),
        DummySignaling::new(),
        store.clone(),
    )
    .with_catalog(CatalogClient::new(&config).expect("client"));

    let preview: Arc<dyn FrameSource> =
        Arc::new(SolidColorSource::new(Resolution::new(32, 24), [210, 170, 140]));
    session
        .turn_on(&DummyCamera::new(Some(preview)))
        .await
        .expect("session on");

    let seeded_lip = Color::rgb(0xC2, 0x1E, 0x56);
    let mut waited = 0;
    while (session.suggestion().is_none()
        || store.snapshot().selected_makeup.get(Region::LipUpper) != seeded_lip)
        && waited < 100
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    assert!(session.suggestion().is_some(), "beautify suggestion prefetched");
    assert_eq!(store.snapshot().selected_makeup.get(Region::LipLower), seeded_lip);
    let brows = store.snapshot().selected_makeup.get(Region::EyebrowLeft);
    let foundation = store.snapshot().selected_makeup.get(Region::Foundation);
    assert_eq!(foundation, Color::rgb(0xF3, 0xCF, 0xB3));

    assert!(session.beautify());
    let after = store.snapshot().selected_makeup;
    assert_eq!(after.get(Region::LipUpper), Color::rgb(0xB5, 0x48, 0x5D));
    assert_eq!(after.get(Region::BlushLeft), Color::rgb(0xE8, 0x84, 0x6B));
    assert_eq!(after.get(Region::Foundation), foundation);
    assert_eq!(after.get(Region::EyebrowRight), brows);

    let recommendations = session.product_recommendations().await.expect("products");
    assert_eq!(
        recommendations.products["Lipstick"][0].0["hex"],
        "#B5485D"
    );
    session.turn_off().await;
}
