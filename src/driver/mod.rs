//! `SessionDriver`の同梱実装
//!
//! コアはtraitにのみ依存する。ここにはChrome DevTools Protocol
//! （chromiumoxide）で駆動する標準実装を置く。

mod chromium;

pub use chromium::ChromiumSession;
