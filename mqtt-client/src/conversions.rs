//! Conversions from loosely typed filter lists into validated filters.
use mqtt_protocol::{FilterBuf, InvalidFilter, QoS};

/// A collection of FilterBuf.
#[derive(Debug)]
pub struct Filters(pub Vec<FilterBuf>);

/// A collection of (FilterBuf, QoS).
#[derive(Debug)]
pub struct FiltersWithQoS(pub Vec<(FilterBuf, QoS)>);

fn collect_filters<S: Into<String>>(
	filters: impl IntoIterator<Item = S>,
) -> Result<Vec<FilterBuf>, InvalidFilter> {
	filters.into_iter().map(FilterBuf::new).collect()
}

fn collect_filters_with_qos<S: Into<String>>(
	filters: impl IntoIterator<Item = (S, QoS)>,
) -> Result<Vec<(FilterBuf, QoS)>, InvalidFilter> {
	filters
		.into_iter()
		.map(|(filter, qos)| Ok((FilterBuf::new(filter)?, qos)))
		.collect()
}

impl TryFrom<&str> for Filters {
	type Error = InvalidFilter;
	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Ok(Self(vec![FilterBuf::new(value)?]))
	}
}

impl TryFrom<&[&str]> for Filters {
	type Error = InvalidFilter;
	fn try_from(value: &[&str]) -> Result<Self, Self::Error> {
		collect_filters(value.iter().copied()).map(Self)
	}
}

impl TryFrom<&[String]> for Filters {
	type Error = InvalidFilter;
	fn try_from(value: &[String]) -> Result<Self, Self::Error> {
		collect_filters(value.iter().cloned()).map(Self)
	}
}

impl TryFrom<Vec<&str>> for Filters {
	type Error = InvalidFilter;
	fn try_from(value: Vec<&str>) -> Result<Self, Self::Error> {
		collect_filters(value).map(Self)
	}
}

impl TryFrom<Vec<String>> for Filters {
	type Error = InvalidFilter;
	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		collect_filters(value).map(Self)
	}
}

impl From<Vec<FilterBuf>> for Filters {
	fn from(value: Vec<FilterBuf>) -> Self {
		Self(value)
	}
}

impl TryFrom<&str> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from(value: &str) -> Result<Self, Self::Error> {
		let filter = FilterBuf::new(value)?;
		Ok(Self(vec![(filter, QoS::default())]))
	}
}

impl TryFrom<String> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from(value: String) -> Result<Self, Self::Error> {
		let filter = FilterBuf::new(value)?;
		Ok(Self(vec![(filter, QoS::default())]))
	}
}

impl<const N: usize> TryFrom<[&str; N]> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from(value: [&str; N]) -> Result<Self, Self::Error> {
		collect_filters_with_qos(value.map(|filter| (filter, QoS::default()))).map(Self)
	}
}

impl TryFrom<(&str, QoS)> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from((filter, qos): (&str, QoS)) -> Result<Self, Self::Error> {
		Ok(Self(vec![(FilterBuf::new(filter)?, qos)]))
	}
}

impl TryFrom<(String, QoS)> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from((filter, qos): (String, QoS)) -> Result<Self, Self::Error> {
		Ok(Self(vec![(FilterBuf::new(filter)?, qos)]))
	}
}

impl TryFrom<Vec<(&str, QoS)>> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from(value: Vec<(&str, QoS)>) -> Result<Self, Self::Error> {
		collect_filters_with_qos(value).map(Self)
	}
}

impl TryFrom<Vec<(String, QoS)>> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from(value: Vec<(String, QoS)>) -> Result<Self, Self::Error> {
		collect_filters_with_qos(value).map(Self)
	}
}

impl TryFrom<(Vec<String>, QoS)> for FiltersWithQoS {
	type Error = InvalidFilter;
	fn try_from((filters, qos): (Vec<String>, QoS)) -> Result<Self, Self::Error> {
		collect_filters_with_qos(filters.into_iter().map(|filter| (filter, qos))).map(Self)
	}
}

#[cfg(test)]
mod tests {
	use super::{Filters, FiltersWithQoS};
	use mqtt_protocol::QoS;

	#[test]
	fn converts_filter_lists() {
		let FiltersWithQoS(filters) = FiltersWithQoS::try_from((
			vec!["a/+".to_string(), "b/#".to_string()],
			QoS::AtLeastOnce,
		))
		.unwrap();
		assert_eq!(filters.len(), 2);
		assert!(filters.iter().all(|(_, qos)| *qos == QoS::AtLeastOnce));

		assert!(Filters::try_from(vec!["a", "b/#/c"]).is_err());
		assert!(FiltersWithQoS::try_from(["a", "b"]).is_ok());
	}
}
