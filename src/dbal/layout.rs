use semver::{Version, VersionReq};

/// Probed on every host after the version specific names.
pub const DEFAULT_DRIVER_FIELDS: &[&str] = &["driver", "_driver", "wrapped_connection", "_conn"];
pub const DEFAULT_CONNECTION_FIELDS: &[&str] = &["_conn", "connection", "_connection"];

#[derive(Clone, Debug)]
pub struct FieldLayout {
    pub versions: VersionReq,
    pub driver_fields: Vec<String>,
    pub connection_fields: Vec<String>,
}

impl FieldLayout {
    pub fn new(versions: VersionReq, driver_fields: &[&str], connection_fields: &[&str]) -> Self {
        Self {
            versions,
            driver_fields: driver_fields.iter().map(|s| s.to_string()).collect(),
            connection_fields: connection_fields.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Field names to probe, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbeOrder {
    pub driver_fields: Vec<String>,
    pub connection_fields: Vec<String>,
}

/// Version keyed table of host field layouts. The most recently added layout
/// whose requirement matches the detected version wins, so layouts added on
/// top of [`LayoutTable::builtin`] override it.
#[derive(Clone, Debug, Default)]
pub struct LayoutTable {
    layouts: Vec<FieldLayout>,
}

impl LayoutTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with_layout(FieldLayout::new(
                VersionReq::parse(">=0.1.0").expect("valid version requirement"),
                &["driver"],
                &["connections"],
            ))
            .with_layout(FieldLayout::new(
                VersionReq::parse("<0.1.0").expect("valid version requirement"),
                &["_driver"],
                &["_conn"],
            ))
    }

    pub fn with_layout(mut self, layout: FieldLayout) -> Self {
        self.layouts.insert(0, layout);
        self
    }

    pub fn layout_for(&self, version: &Version) -> Option<&FieldLayout> {
        self.layouts
            .iter()
            .find(|layout| layout.versions.matches(version))
    }

    pub fn probe_order(&self, version: Option<&Version>) -> ProbeOrder {
        let mut order = ProbeOrder::default();
        if let Some(layout) = version.and_then(|v| self.layout_for(v)) {
            order.driver_fields.extend(layout.driver_fields.iter().cloned());
            order
                .connection_fields
                .extend(layout.connection_fields.iter().cloned());
        }

        for field in DEFAULT_DRIVER_FIELDS {
            if !order.driver_fields.iter().any(|f| f == field) {
                order.driver_fields.push(field.to_string());
            }
        }
        for field in DEFAULT_CONNECTION_FIELDS {
            if !order.connection_fields.iter().any(|f| f == field) {
                order.connection_fields.push(field.to_string());
            }
        }

        order
    }
}

/// Parses a reported version, tolerating a leading `v`.
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}
