use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::client::ratelimit::RateLimiter;
use crate::draw::drawer::Canvas;
use crate::draw::snapshot::{CanvasSnapshot, Color};

pub const DEFAULT_BASE_URL: &str = "https://pixels.pythondiscord.com";

const GET_SIZE: &str = "/get_size";
const GET_PIXELS: &str = "/get_pixels";
const GET_PIXEL: &str = "/get_pixel";
const SET_PIXEL: &str = "/set_pixel";

#[derive(serde::Deserialize)]
struct SizeResponse {
    width: u32,
    height: u32,
}

#[derive(serde::Deserialize)]
struct PixelResponse {
    rgb: String,
}

#[derive(serde::Serialize)]
struct SetPixelBody {
    x: u32,
    y: u32,
    rgb: String,
}

#[derive(serde::Deserialize)]
struct SetPixelResponse {
    message: String,
}

/// Blocking client for the pixels API. Keeps one rate limiter per endpoint,
/// fed from the headers of every response that endpoint returns.
pub struct PixelsClient {
    http: Client,
    base_url: String,
    limiters: HashMap<&'static str, RateLimiter>,
}

impl PixelsClient {
    pub fn new(token: &str, base_url: &str) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("token contains characters not allowed in a header")?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("autodraw/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiters: HashMap::new(),
        })
    }

    /// Sends a request, feeds the endpoint's limiter, and retries after the
    /// advertised cooldown for as long as the server answers 429. Any other
    /// non-success status is fatal and carries the endpoint for diagnosis.
    fn request(
        &mut self,
        endpoint: &'static str,
        build: impl Fn(&Client, &str) -> RequestBuilder,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        loop {
            let response = build(&self.http, &url)
                .send()
                .with_context(|| format!("request to {endpoint} failed"))?;

            let limiter = self
                .limiters
                .entry(endpoint)
                .or_insert_with(|| RateLimiter::new(endpoint));
            limiter.update(response.headers());

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                limiter.pause();
                continue;
            }
            if status == StatusCode::OK {
                return Ok(response);
            }
            bail!("{} returned {}", endpoint, status);
        }
    }

    pub fn size(&mut self) -> Result<(u32, u32)> {
        let size: SizeResponse = self
            .request(GET_SIZE, |http, url| http.get(url))?
            .json()
            .context("malformed /get_size response")?;
        Ok((size.width, size.height))
    }

    /// Fetches the whole canvas as one immutable snapshot.
    pub fn snapshot(&mut self) -> Result<CanvasSnapshot> {
        let (width, height) = self.size()?;
        let body = self
            .request(GET_PIXELS, |http, url| http.get(url))?
            .bytes()
            .context("failed to read /get_pixels body")?;
        CanvasSnapshot::from_raw(width, height, body.to_vec())
    }

    pub fn pixel(&mut self, x: u32, y: u32) -> Result<Color> {
        let pixel: PixelResponse = self
            .request(GET_PIXEL, |http, url| http.get(url).query(&[("x", x), ("y", y)]))?
            .json()
            .context("malformed /get_pixel response")?;
        debug!("pixel at x={x},y={y} is color {}", pixel.rgb);
        Color::from_hex(&pixel.rgb)
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) -> Result<()> {
        let body = SetPixelBody { x, y, rgb: color.hex() };
        let ack: SetPixelResponse = self
            .request(SET_PIXEL, |http, url| http.post(url).json(&body))?
            .json()
            .context("malformed /set_pixel response")?;
        debug!("{}", ack.message);
        Ok(())
    }
}

impl Canvas for PixelsClient {
    fn snapshot(&mut self) -> Result<CanvasSnapshot> {
        PixelsClient::snapshot(self)
    }

    fn write_pixel(&mut self, x: u32, y: u32, color: Color) -> Result<()> {
        self.set_pixel(x, y, color)
    }

    fn write_pacing_delay(&self) -> Option<Duration> {
        self.limiters.get(SET_PIXEL).and_then(|l| l.pacing_delay())
    }
}
