#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings or wire integers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("not a number: {0}")]
	NotANumber(String),
	#[error("id must be positive: {0}")]
	NotPositive(i64),
}

/// Identifier of a registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
	/// Create a positive `UserId`.
	pub fn new(id: i64) -> Result<Self, ParseIdError> {
		if id <= 0 {
			return Err(ParseIdError::NotPositive(id));
		}
		Ok(Self(id))
	}

	pub const fn get(self) -> i64 {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		parse_positive(s).and_then(UserId::new)
	}
}

/// Identifier of a collaboration group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i64);

impl GroupId {
	/// Create a positive `GroupId`.
	pub fn new(id: i64) -> Result<Self, ParseIdError> {
		if id <= 0 {
			return Err(ParseIdError::NotPositive(id));
		}
		Ok(Self(id))
	}

	/// Interpret a wire integer where zero (or anything non-positive) means "absent".
	pub fn from_wire(id: i64) -> Option<Self> {
		(id > 0).then_some(Self(id))
	}

	pub const fn get(self) -> i64 {
		self.0
	}
}

impl fmt::Display for GroupId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for GroupId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		parse_positive(s).and_then(GroupId::new)
	}
}

/// Server-assigned identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(u64);

impl ConnId {
	pub const fn new(id: u64) -> Self {
		Self(id)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ConnId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

fn parse_positive(s: &str) -> Result<i64, ParseIdError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ParseIdError::Empty);
	}

	s.parse::<i64>().map_err(|_| ParseIdError::NotANumber(s.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_id_parse_and_display() {
		assert_eq!("42".parse::<UserId>().unwrap(), UserId::new(42).unwrap());
		assert_eq!(UserId::new(7).unwrap().to_string(), "7");
	}

	#[test]
	fn rejects_non_positive_ids() {
		assert_eq!(UserId::new(0), Err(ParseIdError::NotPositive(0)));
		assert_eq!(GroupId::new(-3), Err(ParseIdError::NotPositive(-3)));
		assert_eq!("".parse::<GroupId>(), Err(ParseIdError::Empty));
		assert!(matches!("abc".parse::<GroupId>(), Err(ParseIdError::NotANumber(_))));
	}

	#[test]
	fn group_id_from_wire_treats_zero_as_absent() {
		assert_eq!(GroupId::from_wire(0), None);
		assert_eq!(GroupId::from_wire(-1), None);
		assert_eq!(GroupId::from_wire(9), Some(GroupId::new(9).unwrap()));
	}

	#[test]
	fn ids_serialize_transparently() {
		let json = serde_json::to_string(&GroupId::new(7).unwrap()).unwrap();
		assert_eq!(json, "7");
		let back: GroupId = serde_json::from_str("7").unwrap();
		assert_eq!(back.get(), 7);
	}
}
