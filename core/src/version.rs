// Simplified relative to the teacher's `agent-core::version`: that module
// reads build-time env vars injected by a dedicated `build.rs` (git
// revision, build status/tag, rustc version). This crate has no release
// pipeline of its own, so it falls back to the values `cargo` always
// provides via `CARGO_PKG_*` and `rustc`'s own version string.

use std::fmt::{self, Display, Formatter};

#[derive(Clone, Debug, Default)]
pub struct BuildInfo {
	pub version: String,
	pub rust_version: String,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: env!("CARGO_PKG_VERSION").to_string(),
			rust_version: rustc_version_str().to_string(),
		}
	}
}

fn rustc_version_str() -> &'static str {
	option_env!("MESH_BUILD_RUSTC_VERSION").unwrap_or("unknown")
}

impl Display for BuildInfo {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"version.BuildInfo{{Version:\"{}\", RustVersion:\"{}\"}}",
			self.version, self.rust_version
		)
	}
}
