//! Request classification: which namespace and which strategy a request gets.

use crate::cache::NamespaceKind;
use crate::config::RoutesConfig;
use crate::network::{Destination, Request, RequestMode};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "webp"];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "eot", "ttf", "otf"];

/// Classification of a same-origin request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
  Image,
  Font,
  Api,
  Page,
  Other,
}

/// Caching strategy applied to a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  StaleWhileRevalidate,
  NetworkFirst,
}

/// Last-resort asset served when everything else failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
  None,
  PlaceholderImage,
  OfflinePage,
}

impl Category {
  pub fn namespace(&self) -> NamespaceKind {
    match self {
      Self::Image => NamespaceKind::Images,
      Self::Font => NamespaceKind::Fonts,
      Self::Api => NamespaceKind::Api,
      Self::Page => NamespaceKind::Pages,
      Self::Other => NamespaceKind::Static,
    }
  }

  pub fn strategy(&self) -> Strategy {
    match self {
      Self::Image | Self::Font => Strategy::CacheFirst,
      Self::Api => Strategy::StaleWhileRevalidate,
      Self::Page | Self::Other => Strategy::NetworkFirst,
    }
  }

  pub fn fallback(&self) -> Fallback {
    match self {
      Self::Image => Fallback::PlaceholderImage,
      Self::Page | Self::Other => Fallback::OfflinePage,
      Self::Font | Self::Api => Fallback::None,
    }
  }
}

/// Pure request classifier, first matching rule wins.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_segments: Vec<String>,
  data_files: Vec<String>,
}

impl Classifier {
  pub fn new(routes: &RoutesConfig) -> Self {
    Self {
      api_segments: routes.api_segments.clone(),
      data_files: routes.data_files.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> Category {
    let path = request.url.path();
    let extension = extension(path);

    if request.destination == Destination::Image || matches_extension(extension, IMAGE_EXTENSIONS)
    {
      return Category::Image;
    }

    if request.destination == Destination::Font || matches_extension(extension, FONT_EXTENSIONS) {
      return Category::Font;
    }

    if self.api_segments.iter().any(|s| path.contains(s.as_str()))
      || self.data_files.iter().any(|f| file_name(path) == f)
    {
      return Category::Api;
    }

    if request.mode == RequestMode::Navigate {
      return Category::Page;
    }

    Category::Other
  }
}

fn file_name(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or("")
}

fn extension(path: &str) -> Option<&str> {
  file_name(path).rsplit_once('.').map(|(_, ext)| ext)
}

fn matches_extension(extension: Option<&str>, set: &[&str]) -> bool {
  extension.is_some_and(|ext| set.iter().any(|candidate| ext.eq_ignore_ascii_case(candidate)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn classifier() -> Classifier {
    Classifier::new(&RoutesConfig::default())
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("https://jobconnect.example.org").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_image_by_extension() {
    assert_eq!(classifier().classify(&get("/static/images/logo.png")), Category::Image);
    assert_eq!(classifier().classify(&get("/img/MAP.JPEG")), Category::Image);
    assert_eq!(classifier().classify(&get("/icons/pin.svg?v=3")), Category::Image);
  }

  #[test]
  fn test_image_by_destination() {
    let request = get("/avatar/42").with_destination(Destination::Image);
    assert_eq!(classifier().classify(&request), Category::Image);
  }

  #[test]
  fn test_font() {
    assert_eq!(classifier().classify(&get("/fonts/roboto.woff2")), Category::Font);
    let request = get("/fonts/roboto").with_destination(Destination::Font);
    assert_eq!(classifier().classify(&request), Category::Font);
  }

  #[test]
  fn test_image_wins_over_api() {
    assert_eq!(classifier().classify(&get("/api/jobs/42/logo.png")), Category::Image);
  }

  #[test]
  fn test_api_segment_and_data_file() {
    assert_eq!(classifier().classify(&get("/api/jobs")), Category::Api);
    assert_eq!(classifier().classify(&get("/mock/data.json")), Category::Api);
    assert_eq!(classifier().classify(&get("/mock/metadata.json")), Category::Other);
  }

  #[test]
  fn test_api_wins_over_navigation() {
    let request = Request::navigate(Url::parse("https://jobconnect.example.org/api/export").unwrap());
    assert_eq!(classifier().classify(&request), Category::Api);
  }

  #[test]
  fn test_navigation_is_page() {
    let request = Request::navigate(Url::parse("https://jobconnect.example.org/gigs").unwrap());
    assert_eq!(classifier().classify(&request), Category::Page);
  }

  #[test]
  fn test_other() {
    assert_eq!(classifier().classify(&get("/static/js/main.js")), Category::Other);
    assert_eq!(Category::Other.namespace(), NamespaceKind::Static);
    assert_eq!(Category::Other.strategy(), Strategy::NetworkFirst);
  }
}
