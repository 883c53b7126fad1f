//! Message selection by header metadata.
//!
//! A [Filter] holds a set of independent criteria. A message is accepted when every active
//! criterion accepts it. Each criterion can be inverted on its own.
use tracing::debug;

use crate::format::HeaderFormat;
use crate::metadata::{MeasurementSource, TimeStatus};
use crate::MetaData;

/// GPS time as a week number and milliseconds into the week.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct GpsTime {
    week: u16,
    ms: u32,
}

impl GpsTime {
    fn new(week: u16, seconds: f64) -> Self {
        Self {
            week,
            ms: (seconds * 1000.0) as u32,
        }
    }

    fn of(meta: &MetaData) -> Self {
        Self {
            week: meta.week,
            ms: meta.milliseconds as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    message_ids: Vec<(u16, HeaderFormat, MeasurementSource)>,
    invert_message_ids: bool,
    message_names: Vec<(String, HeaderFormat, MeasurementSource)>,
    invert_message_names: bool,
    time_statuses: Vec<TimeStatus>,
    invert_time_statuses: bool,
    lower_time: Option<GpsTime>,
    upper_time: Option<GpsTime>,
    invert_time: bool,
    decimation_ms: Option<u32>,
    invert_decimation: bool,
    include_nmea: bool,
    include_responses: bool,
    include_non_responses: bool,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            message_ids: Vec::new(),
            invert_message_ids: false,
            message_names: Vec::new(),
            invert_message_names: false,
            time_statuses: Vec::new(),
            invert_time_statuses: false,
            lower_time: None,
            upper_time: None,
            invert_time: false,
            decimation_ms: None,
            invert_decimation: false,
            include_nmea: false,
            include_responses: true,
            include_non_responses: true,
        }
    }
}

fn push_unique<T: PartialEq>(vec: &mut Vec<T>, item: T) {
    if !vec.contains(&item) {
        vec.push(item);
    }
}

impl Filter {
    /// A filter that accepts every non-NMEA message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every criterion to its default.
    pub fn clear_filters(&mut self) {
        *self = Self::default();
    }

    /// Accept messages with this id. [HeaderFormat::All] matches any format.
    pub fn include_message_id(&mut self, id: u16, format: HeaderFormat, source: MeasurementSource) {
        push_unique(&mut self.message_ids, (id, format, source));
    }

    pub fn include_message_ids<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = (u16, HeaderFormat, MeasurementSource)>,
    {
        for id in ids {
            push_unique(&mut self.message_ids, id);
        }
    }

    pub fn remove_message_id(&mut self, id: u16, format: HeaderFormat, source: MeasurementSource) {
        self.message_ids.retain(|x| *x != (id, format, source));
    }

    pub fn clear_message_ids(&mut self) {
        self.message_ids.clear();
        self.invert_message_ids = false;
    }

    /// Reject the listed ids instead of accepting only them.
    pub fn invert_message_id_filter(&mut self, invert: bool) {
        self.invert_message_ids = invert;
    }

    /// Accept messages with this name. [HeaderFormat::All] matches any format.
    pub fn include_message_name(
        &mut self,
        name: impl Into<String>,
        format: HeaderFormat,
        source: MeasurementSource,
    ) {
        push_unique(&mut self.message_names, (name.into(), format, source));
    }

    pub fn include_message_names<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = (String, HeaderFormat, MeasurementSource)>,
    {
        for name in names {
            push_unique(&mut self.message_names, name);
        }
    }

    pub fn remove_message_name(&mut self, name: &str, format: HeaderFormat, source: MeasurementSource) {
        self.message_names
            .retain(|(n, f, s)| !(n == name && *f == format && *s == source));
    }

    pub fn clear_message_names(&mut self) {
        self.message_names.clear();
        self.invert_message_names = false;
    }

    pub fn invert_message_name_filter(&mut self, invert: bool) {
        self.invert_message_names = invert;
    }

    pub fn include_time_status(&mut self, status: TimeStatus) {
        push_unique(&mut self.time_statuses, status);
    }

    pub fn include_time_statuses<I: IntoIterator<Item = TimeStatus>>(&mut self, statuses: I) {
        for status in statuses {
            push_unique(&mut self.time_statuses, status);
        }
    }

    pub fn remove_time_status(&mut self, status: TimeStatus) {
        self.time_statuses.retain(|s| *s != status);
    }

    pub fn clear_time_statuses(&mut self) {
        self.time_statuses.clear();
        self.invert_time_statuses = false;
    }

    pub fn invert_time_status_filter(&mut self, invert: bool) {
        self.invert_time_statuses = invert;
    }

    /// Reject messages before `week`/`seconds`. The bound itself is accepted.
    pub fn set_include_lower_time_bound(&mut self, week: u16, seconds: f64) {
        self.lower_time = Some(GpsTime::new(week, seconds));
    }

    /// Reject messages after `week`/`seconds`. The bound itself is accepted.
    pub fn set_include_upper_time_bound(&mut self, week: u16, seconds: f64) {
        self.upper_time = Some(GpsTime::new(week, seconds));
    }

    pub fn clear_lower_time_bound(&mut self) {
        self.lower_time = None;
    }

    pub fn clear_upper_time_bound(&mut self) {
        self.upper_time = None;
    }

    pub fn clear_time_bounds(&mut self) {
        self.lower_time = None;
        self.upper_time = None;
    }

    /// Accept only messages outside the time bounds.
    pub fn invert_time_filter(&mut self, invert: bool) {
        self.invert_time = invert;
    }

    /// Accept only messages whose time of week is a multiple of `period` seconds.
    pub fn set_include_decimation(&mut self, period: f64) {
        self.set_include_decimation_ms((period * 1000.0) as u32);
    }

    pub fn set_include_decimation_ms(&mut self, period_ms: u32) {
        self.decimation_ms = Some(period_ms);
    }

    pub fn clear_decimation_filter(&mut self) {
        self.decimation_ms = None;
    }

    pub fn invert_decimation_filter(&mut self, invert: bool) {
        self.invert_decimation = invert;
    }

    /// NMEA sentences bypass every other criterion and are governed only by this flag.
    pub fn include_nmea_messages(&mut self, include: bool) {
        self.include_nmea = include;
    }

    pub fn include_responses(&mut self, include: bool) {
        self.include_responses = include;
    }

    pub fn include_non_responses(&mut self, include: bool) {
        self.include_non_responses = include;
    }

    /// Builder style [Filter::include_nmea_messages].
    #[must_use]
    pub fn with_nmea(mut self, include: bool) -> Self {
        self.include_nmea = include;
        self
    }

    /// Builder style [Filter::set_include_decimation_ms].
    #[must_use]
    pub fn with_decimation_ms(mut self, period_ms: u32) -> Self {
        self.decimation_ms = Some(period_ms);
        self
    }

    fn filter_time(&self, meta: &MetaData) -> bool {
        if self.lower_time.is_none() && self.upper_time.is_none() {
            return true;
        }
        let t = GpsTime::of(meta);
        if self.invert_time {
            let above_lower = self.lower_time.map(|lower| t >= lower);
            let below_upper = self.upper_time.map(|upper| t <= upper);
            return match (above_lower, below_upper) {
                (Some(above), Some(below)) => !(above && below),
                (Some(above), None) => !above,
                (None, Some(below)) => !below,
                (None, None) => true,
            };
        }
        let below_lower = self.lower_time.is_some_and(|lower| t < lower);
        let above_upper = self.upper_time.is_some_and(|upper| t > upper);
        !(below_lower || above_upper)
    }

    fn filter_time_status(&self, meta: &MetaData) -> bool {
        self.time_statuses.is_empty()
            || self.invert_time_statuses != self.time_statuses.contains(&meta.time_status)
    }

    fn filter_message_id(&self, meta: &MetaData) -> bool {
        if self.message_ids.is_empty() {
            return true;
        }
        let source = meta.measurement_source();
        let found = self.message_ids.iter().any(|(id, format, src)| {
            *id == meta.message_id
                && (*format == HeaderFormat::All || *format == meta.format)
                && *src == source
        });
        found != self.invert_message_ids
    }

    fn filter_message_name(&self, meta: &MetaData) -> bool {
        if self.message_names.is_empty() {
            return true;
        }
        let source = meta.measurement_source();
        let found = self.message_names.iter().any(|(name, format, src)| {
            *name == meta.message_name
                && (*format == HeaderFormat::All || *format == meta.format)
                && *src == source
        });
        found != self.invert_message_names
    }

    fn filter_decimation(&self, meta: &MetaData) -> bool {
        match self.decimation_ms {
            Some(period) if period > 0 => {
                let on_period = (meta.milliseconds as u32) % period == 0;
                on_period != self.invert_decimation
            }
            _ => true,
        }
    }

    /// True if the message described by `meta` passes the filter.
    #[must_use]
    pub fn do_filtering(&self, meta: &MetaData) -> bool {
        let accepted = match meta.format {
            HeaderFormat::Unknown => false,
            HeaderFormat::Nmea => self.include_nmea,
            _ if meta.response && !self.include_responses => false,
            _ if !meta.response && !self.include_non_responses => false,
            _ => {
                self.filter_time(meta)
                    && self.filter_time_status(meta)
                    && self.filter_message_id(meta)
                    && self.filter_message_name(meta)
                    && self.filter_decimation(meta)
            }
        };
        if !accepted {
            debug!(message_id = meta.message_id, format = %meta.format, "filtered message");
        }
        accepted
    }
}
