//! Test fixtures: in-process generated images and a wired-up application on the in-memory
//! storage backend.

use std::io::Cursor;
use std::sync::Arc;

use axum_test::TestServer;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::{AppState, build_router};

fn encode(image: RgbImage, format: ImageFormat) -> Bytes {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, format)
        .expect("fixture image encodes");
    Bytes::from(out.into_inner())
}

/// Smooth gradient. Compresses well, so these stay small.
fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

/// Deterministic pseudo-random pixels (64-bit LCG). Encoders can't do much with these, so the
/// output is large relative to its dimensions.
fn noise(width: u32, height: u32) -> RgbImage {
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    RgbImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        let [r, g, b, ..] = (state >> 32).to_le_bytes();
        image::Rgb([r, g, b])
    })
}

pub fn png_fixture(width: u32, height: u32) -> Bytes {
    encode(gradient(width, height), ImageFormat::Png)
}

pub fn jpeg_fixture(width: u32, height: u32) -> Bytes {
    encode(gradient(width, height), ImageFormat::Jpeg)
}

pub fn noise_png_fixture(width: u32, height: u32) -> Bytes {
    encode(noise(width, height), ImageFormat::Png)
}

pub fn noise_jpeg_fixture(width: u32, height: u32) -> Bytes {
    encode(noise(width, height), ImageFormat::Jpeg)
}

pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.storage.backend = StorageBackend::Memory;
    config.storage.memory.signing_secret = Some("test-signing-secret".to_string());
    config.uploads.max_files = 3;
    config
}

/// Application on the in-memory backend with the system clock.
pub fn create_test_app() -> (TestServer, AppState) {
    create_test_app_with(create_test_config(), Arc::new(SystemClock))
}

/// Application on the in-memory backend. The returned state shares its stores with the server,
/// so tests can inspect what a request wrote.
pub fn create_test_app_with(config: Config, clock: Arc<dyn Clock>) -> (TestServer, AppState) {
    let state = AppState::in_memory(config, clock);
    let router = build_router(&state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, state)
}
