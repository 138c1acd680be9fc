//! Clocked attributes: timestamps in three domains.
//!
//! A uref may carry one date per time domain (`sys` wall clock, `prog`
//! normalized program timeline, `orig` source timestamps), tagged with the
//! stage it represents: composition reference, decode or presentation.
//! Two stored deltas (`cr→dts` and `dts→pts`) let any stage be derived
//! from any stored one. The core never invents timestamps; it only
//! stores, derives and routes them.

use crate::udict::AttrValue;

use super::Uref;

/// Stage a stored date represents. Stages are ordered in stream time:
/// `Cr <= Dts <= Pts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateType {
    /// Composition reference (transmission time).
    Cr,
    /// Decode timestamp.
    Dts,
    /// Presentation timestamp.
    Pts,
}

impl DateType {
    fn to_attr(self) -> u8 {
        match self {
            DateType::Cr => 0,
            DateType::Dts => 1,
            DateType::Pts => 2,
        }
    }

    fn from_attr(v: u8) -> Option<Self> {
        Some(match v {
            0 => DateType::Cr,
            1 => DateType::Dts,
            2 => DateType::Pts,
            _ => return None,
        })
    }
}

/// Time domain a date lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDomain {
    /// Local wall clock.
    Sys,
    /// Normalized program timeline.
    Prog,
    /// Source's original timestamps.
    Orig,
}

impl ClockDomain {
    fn date_attr(self) -> &'static str {
        match self {
            ClockDomain::Sys => "k.sys.date",
            ClockDomain::Prog => "k.prog.date",
            ClockDomain::Orig => "k.orig.date",
        }
    }

    fn type_attr(self) -> &'static str {
        match self {
            ClockDomain::Sys => "k.sys.type",
            ClockDomain::Prog => "k.prog.type",
            ClockDomain::Orig => "k.orig.type",
        }
    }
}

const DTS_PTS_DELAY: &str = "k.dts_pts_delay";
const CR_DTS_DELAY: &str = "k.cr_dts_delay";
const DURATION: &str = "k.duration";
const RANDOM: &str = "k.random";
const DISCONTINUITY: &str = "k.discontinuity";
const LATENCY: &str = "k.latency";

impl Uref {
    /// Store a date for `domain`, replacing any previous one.
    pub fn set_date(&mut self, domain: ClockDomain, date: u64, ty: DateType) {
        self.udict
            .set(domain.date_attr(), AttrValue::Unsigned(date));
        self.udict
            .set(domain.type_attr(), AttrValue::SmallUnsigned(ty.to_attr()));
    }

    /// The stored date for `domain`, if any.
    pub fn date(&self, domain: ClockDomain) -> Option<(u64, DateType)> {
        let date = self.udict.get_unsigned(domain.date_attr())?;
        let ty = DateType::from_attr(self.udict.get_small_unsigned(domain.type_attr())?)?;
        Some((date, ty))
    }

    /// Forget the date of `domain`.
    pub fn delete_date(&mut self, domain: ClockDomain) {
        let _ = self
            .udict
            .delete(crate::udict::AttrType::Unsigned, domain.date_attr());
        let _ = self
            .udict
            .delete(crate::udict::AttrType::SmallUnsigned, domain.type_attr());
    }

    /// Stored decode→presentation delay.
    pub fn dts_pts_delay(&self) -> Option<u64> {
        self.udict.get_unsigned(DTS_PTS_DELAY)
    }

    pub fn set_dts_pts_delay(&mut self, delay: u64) {
        self.udict.set(DTS_PTS_DELAY, AttrValue::Unsigned(delay));
    }

    /// Stored reference→decode delay.
    pub fn cr_dts_delay(&self) -> Option<u64> {
        self.udict.get_unsigned(CR_DTS_DELAY)
    }

    pub fn set_cr_dts_delay(&mut self, delay: u64) {
        self.udict.set(CR_DTS_DELAY, AttrValue::Unsigned(delay));
    }

    /// Presentation timestamp in `domain`, derived from the stored date
    /// and delays when needed.
    pub fn pts(&self, domain: ClockDomain) -> Option<u64> {
        let (date, ty) = self.date(domain)?;
        match ty {
            DateType::Pts => Some(date),
            DateType::Dts => Some(date + self.dts_pts_delay()?),
            DateType::Cr => Some(date + self.cr_dts_delay()? + self.dts_pts_delay()?),
        }
    }

    /// Decode timestamp in `domain`.
    pub fn dts(&self, domain: ClockDomain) -> Option<u64> {
        let (date, ty) = self.date(domain)?;
        match ty {
            DateType::Pts => date.checked_sub(self.dts_pts_delay()?),
            DateType::Dts => Some(date),
            DateType::Cr => Some(date + self.cr_dts_delay()?),
        }
    }

    /// Composition reference in `domain`.
    pub fn cr(&self, domain: ClockDomain) -> Option<u64> {
        let (date, ty) = self.date(domain)?;
        match ty {
            DateType::Pts => date
                .checked_sub(self.dts_pts_delay()?)?
                .checked_sub(self.cr_dts_delay()?),
            DateType::Dts => date.checked_sub(self.cr_dts_delay()?),
            DateType::Cr => Some(date),
        }
    }

    /// Store a presentation timestamp for `domain`.
    pub fn set_pts(&mut self, domain: ClockDomain, pts: u64) {
        self.set_date(domain, pts, DateType::Pts);
    }

    /// Store a decode timestamp for `domain`.
    pub fn set_dts(&mut self, domain: ClockDomain, dts: u64) {
        self.set_date(domain, dts, DateType::Dts);
    }

    /// Store a composition reference for `domain`.
    pub fn set_cr(&mut self, domain: ClockDomain, cr: u64) {
        self.set_date(domain, cr, DateType::Cr);
    }

    /// Re-express the stored date of `domain` as the given stage, keeping
    /// the instant it denotes. Fails silently (no change) when the stage
    /// cannot be derived from what is stored.
    pub fn rebase(&mut self, domain: ClockDomain, ty: DateType) {
        let value = match ty {
            DateType::Pts => self.pts(domain),
            DateType::Dts => self.dts(domain),
            DateType::Cr => self.cr(domain),
        };
        if let Some(value) = value {
            self.set_date(domain, value, ty);
        }
    }

    /// Duration of the unit, in 27 MHz ticks.
    pub fn duration(&self) -> Option<u64> {
        self.udict.get_unsigned(DURATION)
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.udict.set(DURATION, AttrValue::Unsigned(duration));
    }

    /// Random-access flag: decoding may start at this unit.
    pub fn random_access(&self) -> bool {
        self.udict.get_void(RANDOM)
    }

    pub fn set_random_access(&mut self) {
        self.udict.set(RANDOM, AttrValue::Void);
    }

    pub fn clear_random_access(&mut self) {
        let _ = self.udict.delete(crate::udict::AttrType::Void, RANDOM);
    }

    /// Discontinuity flag: the stream broke before this unit.
    pub fn discontinuity(&self) -> bool {
        self.udict.get_void(DISCONTINUITY)
    }

    pub fn set_discontinuity(&mut self) {
        self.udict.set(DISCONTINUITY, AttrValue::Void);
    }

    /// Accumulated pipeline latency, in 27 MHz ticks.
    pub fn latency(&self) -> Option<u64> {
        self.udict.get_unsigned(LATENCY)
    }

    pub fn set_latency(&mut self, latency: u64) {
        self.udict.set(LATENCY, AttrValue::Unsigned(latency));
    }
}
