//! The partitioned listing space and its traversal policy.
//!
//! Listings are addressed by movie type, rating interval and page offset.
//! Each page yields at most [`PAGE_SIZE`] entries; a short page ends its
//! interval and the crawl continues at the next lower interval.

use crate::error::SwarmError;
use crate::request::Priority;
use std::fmt;
use std::ops::RangeInclusive;
use url::Url;

pub const DEFAULT_LISTING_URL: &str = "https://movie.douban.com/j/chart/top_list";

pub const PAGE_SIZE: u32 = 100;

pub const MOVIE_TYPES: RangeInclusive<u8> = 1..=31;

/// Rating intervals, highest first.
pub const INTERVALS: [Interval; 10] = [
    Interval::new(100, 90),
    Interval::new(90, 80),
    Interval::new(80, 70),
    Interval::new(70, 60),
    Interval::new(60, 50),
    Interval::new(50, 40),
    Interval::new(40, 30),
    Interval::new(30, 20),
    Interval::new(20, 10),
    Interval::new(10, 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub upper: u8,
    pub lower: u8,
}

impl Interval {
    pub const fn new(upper: u8, lower: u8) -> Self {
        Self { upper, lower }
    }

    pub fn first() -> Self {
        INTERVALS[0]
    }

    fn position(&self) -> Option<usize> {
        INTERVALS.iter().position(|i| i == self)
    }

    /// The next lower interval, or `None` after `10:0`.
    pub fn next(&self) -> Option<Interval> {
        self.position().and_then(|idx| INTERVALS.get(idx + 1).copied())
    }

    pub fn parse(s: &str) -> Result<Self, SwarmError> {
        let (upper, lower) = s
            .split_once(':')
            .ok_or_else(|| SwarmError::InvalidUrl(format!("bad interval '{}'", s)))?;
        let interval = Interval::new(
            upper
                .trim()
                .parse()
                .map_err(|_| SwarmError::InvalidUrl(format!("bad interval '{}'", s)))?,
            lower
                .trim()
                .parse()
                .map_err(|_| SwarmError::InvalidUrl(format!("bad interval '{}'", s)))?,
        );
        if interval.position().is_none() {
            return Err(SwarmError::InvalidUrl(format!("unknown interval '{}'", s)));
        }
        Ok(interval)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.upper, self.lower)
    }
}

/// One page of one interval of one movie type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub movie_type: u8,
    pub interval: Interval,
    pub start: u32,
}

impl ListingPage {
    pub fn new(movie_type: u8, interval: Interval, start: u32) -> Self {
        Self {
            movie_type,
            interval,
            start,
        }
    }

    /// First page of the top interval for every movie type.
    pub fn seeds() -> Vec<ListingPage> {
        MOVIE_TYPES
            .map(|t| ListingPage::new(t, Interval::first(), 0))
            .collect()
    }

    pub fn page_index(&self) -> u32 {
        self.start / PAGE_SIZE
    }

    /// `(100 - upper) * 1000 + page`; smaller means crawled sooner.
    pub fn magnitude(&self) -> i64 {
        (100 - i64::from(self.interval.upper)) * 1000 + i64::from(self.page_index())
    }

    pub fn priority(&self) -> Priority {
        Priority::new(-self.magnitude())
    }

    pub fn url(&self, base: &str) -> String {
        format!(
            "{}?type={}&interval_id={}&action=&start={}&limit={}",
            base, self.movie_type, self.interval, self.start, PAGE_SIZE
        )
    }

    pub fn from_url(url: &str) -> Result<Self, SwarmError> {
        let parsed =
            Url::parse(url).map_err(|e| SwarmError::InvalidUrl(format!("{}: {}", url, e)))?;

        let mut movie_type = None;
        let mut interval = None;
        let mut start = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "type" => movie_type = value.parse::<u8>().ok(),
                "interval_id" => interval = Some(Interval::parse(&value)?),
                "start" => start = value.parse::<u32>().ok(),
                _ => {}
            }
        }

        match (movie_type, interval, start) {
            (Some(movie_type), Some(interval), Some(start)) => {
                Ok(ListingPage::new(movie_type, interval, start))
            }
            _ => Err(SwarmError::InvalidUrl(format!(
                "listing URL missing type/interval_id/start: {}",
                url
            ))),
        }
    }

    /// The page to crawl after this one returned `entries` items.
    ///
    /// A full page continues the interval; a short page moves to the next
    /// interval, and a short page on the last interval ends the movie type.
    pub fn next_after(&self, entries: usize) -> Option<ListingPage> {
        if entries < PAGE_SIZE as usize {
            self.interval
                .next()
                .map(|next| ListingPage::new(self.movie_type, next, 0))
        } else {
            Some(ListingPage::new(
                self.movie_type,
                self.interval,
                self.start + PAGE_SIZE,
            ))
        }
    }
}
