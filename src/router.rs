//! Request router: classifies every intercepted request into a strategy.

use url::Url;

use crate::fetch::{Destination, FetchRequest};

/// Which strategy handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// API namespace: network-first with queue fallback for mutations
  Api,
  /// Images: cache-first with placeholder fallback
  Image,
  /// Scripts and styles: cache-first, hard failure offline
  Asset,
  /// Everything else: network-first with app-shell fallback
  Document,
}

/// Classify a request, in priority order: API path prefix, then image
/// destination, then script/style destination, then document.
///
/// Returns `None` for anything that is not HTTP(S) (chrome-extension:,
/// data:, blob:, ...), which must be passed through unhandled.
/// Classification is total over HTTP(S) requests.
pub fn classify(request: &FetchRequest, api_prefix: &str) -> Option<RouteClass> {
  let url = Url::parse(&request.url).ok()?;

  if !matches!(url.scheme(), "http" | "https") {
    return None;
  }

  if url.path().starts_with(api_prefix) {
    return Some(RouteClass::Api);
  }

  Some(match request.destination {
    Destination::Image => RouteClass::Image,
    Destination::Script | Destination::Style => RouteClass::Asset,
    _ => RouteClass::Document,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const API_PREFIX: &str = "/api/";

  #[test]
  fn test_api_prefix_wins() {
    let req = FetchRequest::get("https://dash.test/api/outlets");
    assert_eq!(classify(&req, API_PREFIX), Some(RouteClass::Api));

    // Prefix beats destination.
    let req = FetchRequest::get("https://dash.test/api/avatar.png")
      .with_destination(Destination::Image);
    assert_eq!(classify(&req, API_PREFIX), Some(RouteClass::Api));
  }

  #[test]
  fn test_image_destination() {
    let req = FetchRequest::get("https://dash.test/photos/outlet-7.jpg")
      .with_destination(Destination::Image);
    assert_eq!(classify(&req, API_PREFIX), Some(RouteClass::Image));
  }

  #[test]
  fn test_script_and_style_are_assets() {
    let script = FetchRequest::get("https://dash.test/assets/app.js")
      .with_destination(Destination::Script);
    assert_eq!(classify(&script, API_PREFIX), Some(RouteClass::Asset));

    let style = FetchRequest::get("https://dash.test/assets/app.css")
      .with_destination(Destination::Style);
    assert_eq!(classify(&style, API_PREFIX), Some(RouteClass::Asset));
  }

  #[test]
  fn test_default_is_document() {
    let nav = FetchRequest::get("https://dash.test/routes/north")
      .with_destination(Destination::Document);
    assert_eq!(classify(&nav, API_PREFIX), Some(RouteClass::Document));

    let other = FetchRequest::get("https://dash.test/fonts/inter.woff2");
    assert_eq!(classify(&other, API_PREFIX), Some(RouteClass::Document));
  }

  #[test]
  fn test_non_http_passes_through() {
    for url in [
      "chrome-extension://abcdef/script.js",
      "data:text/plain,hello",
      "file:///tmp/report.csv",
      "not a url",
    ] {
      let req = FetchRequest::get(url);
      assert_eq!(classify(&req, API_PREFIX), None);
    }
  }
}
