//! Routing suffixes on externally visible session ids.
//!
//! The container sees `<base-id><delimiter><route>`; the store only ever sees
//! `<base-id>`. The route is produced by an [`Affinity`] and never parsed.

/// Supplies the routing suffix for a session id.
pub trait Affinity: Send + Sync {
	/// Returns the route for `id`, or an empty string for no route.
	fn route(&self, id: &str) -> String;
}

impl<F> Affinity for F
where
	F: Fn(&str) -> String + Send + Sync,
{
	fn route(&self, id: &str) -> String {
		self(id)
	}
}

/// Affinity that never routes; internal ids equal base ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAffinity;

impl Affinity for NoAffinity {
	fn route(&self, _id: &str) -> String {
		String::new()
	}
}

/// Affinity that routes every session to one fixed member name.
#[derive(Debug, Clone)]
pub struct FixedRoute(pub String);

impl Affinity for FixedRoute {
	fn route(&self, _id: &str) -> String {
		self.0.clone()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteCodec {
	delimiter: char,
}

impl RouteCodec {
	pub fn new(delimiter: char) -> Self {
		Self { delimiter }
	}

	pub fn delimiter(&self) -> char {
		self.delimiter
	}

	/// Returns the base id, cutting at the first delimiter.
	pub fn strip<'a>(&self, id: &'a str) -> &'a str {
		self.split(id).0
	}

	/// Splits an internal id into base id and route.
	pub fn split<'a>(&self, id: &'a str) -> (&'a str, Option<&'a str>) {
		match id.split_once(self.delimiter) {
			Some((base, route)) => (base, Some(route)),
			None => (id, None),
		}
	}

	/// Appends `route` to `id`. An empty route leaves the id bare.
	pub fn format(&self, id: &str, route: &str) -> String {
		if route.is_empty() {
			return id.to_string();
		}
		let mut internal = String::with_capacity(id.len() + route.len() + self.delimiter.len_utf8());
		internal.push_str(id);
		internal.push(self.delimiter);
		internal.push_str(route);
		internal
	}
}

impl Default for RouteCodec {
	fn default() -> Self {
		Self::new(crate::config::DEFAULT_ROUTE_DELIMITER)
	}
}
