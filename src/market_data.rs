//! Market-data record types fanned out by the hub.
//!
//! Every record is plain `Copy` data of a fixed size, so a slot overwrite
//! in the ring can never leave a partially-dropped value behind, and
//! consumers copy records out of the ring by value.

use std::fmt;

/// Maximum length of an instrument symbol, in bytes.
pub const SYMBOL_LEN: usize = 32;

/// Fixed-size, NUL-padded instrument symbol.
///
/// Stored inline so that every record stays trivially copyable; input
/// longer than [`SYMBOL_LEN`] bytes is truncated at a character boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Symbol([u8; SYMBOL_LEN]);

impl Symbol {
    pub fn new(s: &str) -> Self {
        let mut buf = [0u8; SYMBOL_LEN];
        let mut end = s.len().min(SYMBOL_LEN);
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        buf[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(SYMBOL_LEN);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Self([0u8; SYMBOL_LEN])
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candlestick. Timestamps are nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Kline {
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub symbol: Symbol,
}

/// One trade print.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Trade {
    pub timestamp: u64,
    pub price: f64,
    pub quantity: f64,
    pub symbol: Symbol,
    pub is_buyer_maker: bool,
}

/// Top-of-book quote.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BookL1 {
    pub timestamp: u64,
    pub bid_price: f64,
    pub bid_quantity: f64,
    pub ask_price: f64,
    pub ask_quantity: f64,
    pub symbol: Symbol,
}

/// Discriminant of [`MarketData`], used by subscribers to filter the stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DataType {
    Kline,
    Trade,
    BookL1,
}

/// The tagged record variant carried by the hub's ring.
///
/// All arms are fixed-size `Copy` structs, so the whole enum fits one ring
/// slot and can be duplicated with a plain memory copy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MarketData {
    Kline(Kline),
    Trade(Trade),
    BookL1(BookL1),
}

impl MarketData {
    /// The record's tag. Constant-time; this is the filter key.
    #[inline(always)]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Kline(_) => DataType::Kline,
            Self::Trade(_) => DataType::Trade,
            Self::BookL1(_) => DataType::BookL1,
        }
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Kline(k) => k.timestamp,
            Self::Trade(t) => t.timestamp,
            Self::BookL1(b) => b.timestamp,
        }
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        match self {
            Self::Kline(k) => k.symbol,
            Self::Trade(t) => t.symbol,
            Self::BookL1(b) => b.symbol,
        }
    }
}

// Ring slots are default-initialised before the first write; an empty
// candlestick is the designated placeholder.
impl Default for MarketData {
    fn default() -> Self {
        Self::Kline(Kline::default())
    }
}

impl From<Kline> for MarketData {
    fn from(k: Kline) -> Self {
        Self::Kline(k)
    }
}

impl From<Trade> for MarketData {
    fn from(t: Trade) -> Self {
        Self::Trade(t)
    }
}

impl From<BookL1> for MarketData {
    fn from(b: BookL1) -> Self {
        Self::BookL1(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_roundtrip_and_truncation() {
        let s = Symbol::new("BTCUSDT");
        assert_eq!(s.as_str(), "BTCUSDT");
        assert!(!s.is_empty());

        let long = "X".repeat(100);
        let t = Symbol::new(&long);
        assert_eq!(t.as_str().len(), SYMBOL_LEN);

        assert!(Symbol::default().is_empty());
        assert_eq!(Symbol::default().as_str(), "");
    }

    #[test]
    fn symbol_truncates_on_char_boundary() {
        // 31 ASCII bytes followed by a multi-byte char that would straddle
        // the 32-byte boundary; the whole char must be dropped.
        let s = format!("{}é", "a".repeat(31));
        let sym = Symbol::new(&s);
        assert_eq!(sym.as_str(), "a".repeat(31));
    }

    #[test]
    fn data_type_matches_arm() {
        let trade = MarketData::Trade(Trade {
            timestamp: 1,
            price: 50_000.0,
            quantity: 1.0,
            symbol: Symbol::new("BTCUSDT"),
            is_buyer_maker: false,
        });
        assert_eq!(trade.data_type(), DataType::Trade);
        assert_eq!(trade.timestamp(), 1);
        assert_eq!(trade.symbol().as_str(), "BTCUSDT");

        assert_eq!(MarketData::from(Kline::default()).data_type(), DataType::Kline);
        assert_eq!(MarketData::from(BookL1::default()).data_type(), DataType::BookL1);
        assert_eq!(MarketData::default().data_type(), DataType::Kline);
    }
}
