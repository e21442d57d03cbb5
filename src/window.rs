//! Windowed access to historical attribute data.

use std::sync::Arc;

use derive_more::derive::Display;
use derive_more::derive::From;
use derive_more::derive::Into;

use crate::error::DataError;

/// Index of an attribute (column) in a [`Schema`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash, PartialOrd, Ord, From, Into)]
pub struct AttrId(pub u8);

impl AttrId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names of the attributes a chromosome may look up, e.g. `close`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    names: Vec<String>,
}

impl Schema {
    /// Most attributes an [`AttrId`] can address.
    pub const MAX_ATTRIBUTES: usize = u8::MAX as usize + 1;

    pub fn new<I, S>(names: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() > Self::MAX_ATTRIBUTES {
            return Err(DataError::TooManyAttributes {
                count: names.len(),
                max: Self::MAX_ATTRIBUTES,
            });
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<AttrId> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| u8::try_from(i).ok())
            .map(AttrId)
    }

    /// Panics if `attr` is not part of this schema.
    pub fn name(&self, attr: AttrId) -> &str {
        &self.names[attr.index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = AttrId> + '_ {
        (0..=u8::MAX).take(self.names.len()).map(AttrId)
    }
}

/// A read-only view of the attribute data around one forecasting point.
///
/// Offsets count backwards from the most recent row of the window, so
/// offset `0` is "today". The window must not change while a population is
/// being scored against it.
pub trait AttrWindow: Sync {
    /// Value of `attr` at `offset`, or `None` when outside the window.
    fn lookup(&self, attr: AttrId, offset: u16) -> Option<f64>;

    /// The true value a forecast made from this window is compared to.
    fn target(&self) -> f64;
}

/// Column-oriented in-memory history, one column per schema attribute.
#[derive(Clone, Debug)]
pub struct PriceSeries {
    schema: Arc<Schema>,
    columns: Vec<Vec<f64>>,
}

impl PriceSeries {
    pub fn new(schema: Arc<Schema>, columns: Vec<Vec<f64>>) -> Result<Self, DataError> {
        if schema.len() != columns.len() {
            return Err(DataError::SchemaMismatch {
                attributes: schema.len(),
                columns: columns.len(),
            });
        }
        let expected = columns.first().map_or(0, Vec::len);
        for (attr, column) in schema.ids().zip(&columns) {
            if column.len() != expected {
                return Err(DataError::RaggedColumn {
                    name: schema.name(attr).to_string(),
                    len: column.len(),
                    expected,
                });
            }
        }
        Ok(Self { schema, columns })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// All windows of `days` rows whose target, `horizon` rows past the
    /// window's last row, is known. Oldest first.
    pub fn windows(
        &self,
        days: usize,
        horizon: usize,
        target: &str,
    ) -> Result<Vec<PriceWindow<'_>>, DataError> {
        let target = self
            .schema
            .position(target)
            .ok_or_else(|| DataError::UnknownAttribute(target.to_string()))?;
        let first = days.saturating_sub(1);
        let anchors = first..self.rows().saturating_sub(horizon);
        Ok(anchors
            .map(|anchor| PriceWindow {
                series: self,
                anchor,
                days,
                target: self.columns[target.index()][anchor + horizon],
            })
            .collect())
    }

    /// The most recent window, whose target lies in the future.
    pub fn latest(&self, days: usize) -> Option<PriceWindow<'_>> {
        let anchor = self.rows().checked_sub(1)?;
        (anchor + 1 >= days).then_some(PriceWindow {
            series: self,
            anchor,
            days,
            target: f64::NAN,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PriceWindow<'a> {
    series: &'a PriceSeries,
    anchor: usize,
    days: usize,
    target: f64,
}

impl AttrWindow for PriceWindow<'_> {
    fn lookup(&self, attr: AttrId, offset: u16) -> Option<f64> {
        let offset = usize::from(offset);
        if offset >= self.days {
            return None;
        }
        let row = self.anchor.checked_sub(offset)?;
        self.series.columns.get(attr.index())?.get(row).copied()
    }

    fn target(&self) -> f64 {
        self.target
    }
}
