pub mod bar;
pub mod news;
pub mod symbol;
pub mod tick;
pub mod watchlist;

pub use bar::{floor_to_minute, Bar};
pub use news::{NewsFrame, NewsItem};
pub use symbol::{InvalidSymbol, Symbol};
pub use tick::{MarketEvent, Quote, Trade, UpstreamBar};
pub use watchlist::WatchlistEntry;
