use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::graph;
use crate::port::Port;
use crate::port::identifier::{PortKind, PortOwner, PortUuid};

/// A directed edge between two port ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConnection {
    pub src: PortUuid,
    pub dest: PortUuid,
    /// Scales the signal along this edge. 1.0 passes through.
    pub multiplier: f32,
    /// Locked edges are owned by the engine and hidden from user editing.
    pub locked: bool,
    pub enabled: bool,
    /// Additive offset applied when a CV edge modulates a control port.
    pub base_value: f32,
}

impl PortConnection {
    pub fn new(src: PortUuid, dest: PortUuid, multiplier: f32, locked: bool, enabled: bool) -> Self {
        Self {
            src,
            dest,
            multiplier,
            locked,
            enabled,
            base_value: 0.0,
        }
    }
}

/// Flat registry of every edge in the project. Mutation happens on the
/// control thread only; queries are safe anywhere. Edge order is stable
/// and doubles as CV summation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConnectionsManager {
    connections: Vec<PortConnection>,
}

impl PortConnectionsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn find_index(&self, src: PortUuid, dest: PortUuid) -> Option<usize> {
        self.connections
            .iter()
            .position(|c| c.src == src && c.dest == dest)
    }

    pub fn connection_exists(&self, src: PortUuid, dest: PortUuid) -> bool {
        self.find_index(src, dest).is_some()
    }

    pub fn find_connection(&self, src: PortUuid, dest: PortUuid) -> Option<&PortConnection> {
        self.find_index(src, dest).map(|i| &self.connections[i])
    }

    /// Adds the edge, or updates its settings in place when it already
    /// exists. Idempotent.
    pub fn ensure_connect(
        &mut self,
        src: PortUuid,
        dest: PortUuid,
        multiplier: f32,
        locked: bool,
        enabled: bool,
    ) -> &PortConnection {
        if let Some(i) = self.find_index(src, dest) {
            let conn = &mut self.connections[i];
            conn.multiplier = multiplier;
            conn.locked = locked;
            conn.enabled = enabled;
            return &self.connections[i];
        }
        debug!(%src, %dest, "connecting ports");
        let idx = self.connections.len();
        self.connections
            .push(PortConnection::new(src, dest, multiplier, locked, enabled));
        &self.connections[idx]
    }

    /// Removes the edge if present. Returns whether anything was removed.
    pub fn ensure_disconnect(&mut self, src: PortUuid, dest: PortUuid) -> bool {
        match self.find_index(src, dest) {
            Some(i) => {
                debug!(%src, %dest, "disconnecting ports");
                self.connections.remove(i);
                true
            }
            None => false,
        }
    }

    /// Removes every edge where `port` is source or destination.
    pub fn disconnect_all_for(&mut self, port: PortUuid) -> usize {
        let before = self.connections.len();
        self.connections
            .retain(|c| c.src != port && c.dest != port);
        before - self.connections.len()
    }

    /// Appends matching edges to `out` (when given) and returns how many
    /// matched. `find_sources` looks for edges feeding `port`, otherwise
    /// for edges leaving it.
    pub fn get_sources_or_dests(
        &self,
        mut out: Option<&mut Vec<PortConnection>>,
        port: PortUuid,
        find_sources: bool,
    ) -> usize {
        let mut count = 0;
        for conn in &self.connections {
            let matched = if find_sources {
                conn.dest == port
            } else {
                conn.src == port
            };
            if matched {
                count += 1;
                if let Some(v) = out.as_deref_mut() {
                    v.push(conn.clone());
                }
            }
        }
        count
    }

    /// The unique edge feeding (or leaving) `port`, or `None` when there
    /// are zero or several.
    pub fn get_source_or_dest(&self, port: PortUuid, find_source: bool) -> Option<&PortConnection> {
        let mut found = None;
        for conn in &self.connections {
            let matched = if find_source {
                conn.dest == port
            } else {
                conn.src == port
            };
            if matched {
                if found.is_some() {
                    return None;
                }
                found = Some(conn);
            }
        }
        found
    }

    /// User-driven connect: validates signal compatibility and graph
    /// acyclicity before adding the edge. Engine-internal wiring that is
    /// correct by construction uses `ensure_connect` directly.
    pub fn connect_checked<F>(
        &mut self,
        src: &Port,
        dest: &Port,
        owner_of: F,
    ) -> Result<&PortConnection, Error>
    where
        F: Fn(PortUuid) -> Option<PortOwner>,
    {
        if !kinds_compatible(src.id.kind, dest.id.kind) {
            return Err(Error::KindMismatch {
                src: src.id.kind,
                dest: dest.id.kind,
            });
        }
        if self.would_create_cycle(src.uuid(), dest.uuid(), owner_of) {
            return Err(Error::Cycle(dest.uuid()));
        }
        Ok(self.ensure_connect(src.uuid(), dest.uuid(), 1.0, false, true))
    }

    /// Checks a prospective edge against the owner-level graph. `owner_of`
    /// resolves port ids to their owning units.
    pub fn would_create_cycle<F>(&self, src: PortUuid, dest: PortUuid, owner_of: F) -> bool
    where
        F: Fn(PortUuid) -> Option<PortOwner>,
    {
        let (Some(from), Some(to)) = (owner_of(src), owner_of(dest)) else {
            return false;
        };
        graph::would_create_cycle(&from, &to, |owner| {
            self.connections
                .iter()
                .filter(|c| owner_of(c.src).as_ref() == Some(owner))
                .filter_map(|c| owner_of(c.dest))
                .collect::<Vec<_>>()
        })
    }
}

/// Same-kind edges always work; CV additionally modulates control ports.
fn kinds_compatible(src: PortKind, dest: PortKind) -> bool {
    src == dest || (src == PortKind::Cv && dest == PortKind::Control)
}
