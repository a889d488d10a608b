use crate::engine::job::{JobClosure, JobKind};
use crate::engine::job_ticket::{JobTicket, Prerequisite, Prerequisites, Provision, TicketRef};
use crate::foundation::error::{GearError, GearResult};
use crate::foundation::ids::{SegmentId, TicketId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Exit-node nesting beyond this depth is treated as a malformed model.
pub const MAX_BUILD_DEPTH: usize = 256;

/// Ticket storage for one segment of the low-level model.
///
/// Owns every [`JobTicket`] built for the segment; prerequisites refer to siblings by
/// [`TicketId`]. Tickets are never removed individually: the whole arena is dropped when the
/// segment is superseded.
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    tickets: Vec<JobTicket>,
}

impl Segment {
    /// Wrap pre-assembled tickets; `tickets[i]` must carry `TicketId(i)`.
    pub fn from_tickets(id: SegmentId, tickets: Vec<JobTicket>) -> GearResult<Self> {
        let seg = Self { id, tickets };
        seg.validate()?;
        Ok(seg)
    }

    /// Segment identity.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Number of tickets.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// `true` when no ticket was built.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Ticket `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this segment.
    pub fn ticket(&self, id: TicketId) -> TicketRef<'_> {
        match self.get(id) {
            Some(t) => t,
            None => panic!(
                "ticket {} is not part of segment {} ({} tickets)",
                id.0,
                self.id.0,
                self.tickets.len()
            ),
        }
    }

    /// Ticket `id`, if present.
    pub fn get(&self, id: TicketId) -> Option<TicketRef<'_>> {
        self.tickets.get(id.index()).map(|t| TicketRef::new(self, t))
    }

    /// Look a ticket up by exit-node name.
    pub fn find(&self, name: &str) -> Option<TicketRef<'_>> {
        self.tickets
            .iter()
            .find(|t| t.name() == name)
            .map(|t| TicketRef::new(self, t))
    }

    /// All tickets in arena order (prerequisites before dependents for built segments).
    pub fn tickets(&self) -> impl Iterator<Item = TicketRef<'_>> {
        self.tickets.iter().map(|t| TicketRef::new(self, t))
    }

    fn link_is_sound(&self, p: Prerequisite) -> bool {
        self.tickets
            .get(p.ticket.index())
            .is_some_and(|t| (p.channel as usize) < t.channel_count())
    }

    /// Structural check of `root` and every ticket reachable from it.
    pub(crate) fn check_reachable(&self, root: TicketId) -> bool {
        let mut seen = HashSet::new();
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(t) = self.tickets.get(id.index()) else {
                return false;
            };
            if !t.is_well_formed() {
                return false;
            }
            for list in &t.prerequisites {
                for &p in list {
                    if !self.link_is_sound(p) {
                        return false;
                    }
                    work.push(p.ticket);
                }
            }
        }
        true
    }

    /// Full structural validation: arena indices, per-ticket shape, prerequisite links, and
    /// absence of dependency cycles.
    pub fn validate(&self) -> GearResult<()> {
        for (i, t) in self.tickets.iter().enumerate() {
            if t.id.index() != i {
                return Err(GearError::validation(format!(
                    "ticket '{}' carries id {} but is stored at index {i}",
                    t.name, t.id.0
                )));
            }
            if !t.is_well_formed() {
                return Err(GearError::validation(format!(
                    "ticket '{}' has {} channel provisions but {} prerequisite lists",
                    t.name,
                    t.provisions.len(),
                    t.prerequisites.len()
                )));
            }
            for (ch, list) in t.prerequisites.iter().enumerate() {
                if let Some(bad) = list.iter().find(|p| !self.link_is_sound(**p)) {
                    return Err(GearError::validation(format!(
                        "ticket '{}' channel {ch} refers to unknown prerequisite {}:{}",
                        t.name, bad.ticket.0, bad.channel
                    )));
                }
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> GearResult<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Open,
            Closed,
        }

        let mut marks = HashMap::<Prerequisite, Mark>::new();
        for t in &self.tickets {
            for ch in 0..t.channel_count() as u32 {
                let start = Prerequisite::new(t.id, ch);
                if marks.contains_key(&start) {
                    continue;
                }
                // (node, index of next prerequisite to visit)
                let mut stack = vec![(start, 0usize)];
                marks.insert(start, Mark::Open);
                while let Some(&(node, next)) = stack.last() {
                    let prereqs = self.tickets[node.ticket.index()].prerequisites(node.channel);
                    if let Some(&child) = prereqs.get(next) {
                        if let Some(top) = stack.last_mut() {
                            top.1 += 1;
                        }
                        match marks.get(&child) {
                            Some(Mark::Open) => {
                                return Err(GearError::validation(format!(
                                    "prerequisite cycle through ticket '{}' channel {}",
                                    self.tickets[child.ticket.index()].name,
                                    child.channel
                                )));
                            }
                            Some(Mark::Closed) => {}
                            None => {
                                marks.insert(child, Mark::Open);
                                stack.push((child, 0));
                            }
                        }
                    } else {
                        marks.insert(node, Mark::Closed);
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }
}

/// Point in the processing graph from which output data is pulled.
///
/// Stand-in for the node network of the low-level model: each channel carries the closure that
/// computes it and the exit points that must be pulled first.
pub struct ExitNode {
    name: String,
    channels: Vec<ExitChannel>,
}

/// One output channel of an [`ExitNode`].
pub struct ExitChannel {
    closure: Arc<dyn JobClosure>,
    pipeline_identity: u64,
    prerequisites: Vec<ExitLink>,
}

/// Dependency on one channel of another exit node.
#[derive(Clone)]
pub struct ExitLink {
    node: Arc<ExitNode>,
    channel: u32,
}

impl ExitLink {
    /// Depend on `channel` of `node`.
    pub fn new(node: &Arc<ExitNode>, channel: u32) -> Self {
        Self {
            node: node.clone(),
            channel,
        }
    }
}

impl ExitNode {
    /// Exit node without channels.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Vec::new(),
        }
    }

    /// Append a channel computed by `closure` after `prerequisites`.
    ///
    /// The pipeline identity is derived from the node name and channel number.
    pub fn with_channel(
        mut self,
        closure: Arc<dyn JobClosure>,
        prerequisites: Vec<ExitLink>,
    ) -> Self {
        let ch = self.channels.len() as u64;
        let pipeline_identity = xxhash_rust::xxh3::xxh3_64_with_seed(self.name.as_bytes(), ch);
        self.channels.push(ExitChannel {
            closure,
            pipeline_identity,
            prerequisites,
        });
        self
    }

    /// Finish building and share.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Builds the ticket arena of one segment by recursive descent over exit nodes.
///
/// Recursion depth follows the authored nesting of exit nodes and is capped at
/// [`MAX_BUILD_DEPTH`]. Exit nodes reachable along several paths get a single shared ticket.
pub struct SegmentBuilder {
    id: SegmentId,
    tickets: Vec<JobTicket>,
    by_node: HashMap<usize, TicketId>,
}

impl SegmentBuilder {
    /// Start building segment `id`.
    pub fn new(id: SegmentId) -> Self {
        Self {
            id,
            tickets: Vec::new(),
            by_node: HashMap::new(),
        }
    }

    /// Build tickets for `exit` and everything it depends on; returns the ticket of `exit`.
    #[tracing::instrument(skip_all, fields(segment = self.id.0, exit = %exit.name))]
    pub fn add_exit(&mut self, exit: &Arc<ExitNode>) -> GearResult<TicketId> {
        self.descend(exit, 0)
    }

    fn descend(&mut self, node: &Arc<ExitNode>, depth: usize) -> GearResult<TicketId> {
        let key = Arc::as_ptr(node) as usize;
        if let Some(&id) = self.by_node.get(&key) {
            return Ok(id);
        }
        if depth > MAX_BUILD_DEPTH {
            return Err(GearError::validation(format!(
                "exit node '{}' nested deeper than {MAX_BUILD_DEPTH} levels",
                node.name
            )));
        }
        if node.channels.is_empty() {
            return Err(GearError::validation(format!(
                "exit node '{}' provides no channels",
                node.name
            )));
        }

        let mut provisions = Vec::with_capacity(node.channels.len());
        let mut prerequisites = Vec::with_capacity(node.channels.len());
        for ch in &node.channels {
            let mut list = Prerequisites::new();
            for link in &ch.prerequisites {
                if link.channel as usize >= link.node.channels.len() {
                    return Err(GearError::validation(format!(
                        "exit node '{}' depends on missing channel {} of '{}'",
                        node.name, link.channel, link.node.name
                    )));
                }
                let t = self.descend(&link.node, depth + 1)?;
                list.push(Prerequisite::new(t, link.channel));
            }
            provisions.push(Provision::new(ch.closure.clone(), ch.pipeline_identity));
            prerequisites.push(list);
        }

        let id = TicketId(u32::try_from(self.tickets.len()).map_err(|_| {
            GearError::resource("segment exceeds the maximum number of job tickets")
        })?);
        self.tickets
            .push(JobTicket::new(id, node.name.clone(), provisions, prerequisites));
        self.by_node.insert(key, id);
        tracing::trace!(ticket = id.0, name = %node.name, "job ticket built");
        Ok(id)
    }

    /// Seal the arena.
    pub fn finish(self) -> GearResult<Segment> {
        let seg = Segment::from_tickets(self.id, self.tickets)?;
        tracing::debug!(segment = seg.id.0, tickets = seg.len(), "segment built");
        Ok(seg)
    }
}

/// Build a segment holding the tickets for a single exit node.
pub fn build_segment(id: SegmentId, exit: &Arc<ExitNode>) -> GearResult<(Segment, TicketId)> {
    let mut builder = SegmentBuilder::new(id);
    let root = builder.add_exit(exit)?;
    Ok((builder.finish()?, root))
}

/// Serializable description of a segment's exit-node graph.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SegmentSpec {
    /// Segment identity.
    #[serde(default)]
    pub segment: u32,
    /// Name of the node whose jobs are planned.
    pub exit: String,
    /// All nodes, by name.
    pub nodes: BTreeMap<String, NodeSpec>,
}

/// Serializable exit node.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeSpec {
    /// Channels of the node; at least one.
    pub channels: Vec<ChannelSpec>,
}

/// Serializable exit-node channel.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelSpec {
    /// Kind of job computing this channel.
    #[serde(default = "default_kind")]
    pub kind: JobKind,
    /// Simulated work per invocation, in microseconds.
    #[serde(default)]
    pub work_us: u64,
    /// Channels of other nodes to compute first.
    #[serde(default)]
    pub prerequisites: Vec<LinkSpec>,
}

/// Serializable dependency.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkSpec {
    /// Name of the prerequisite node.
    pub node: String,
    /// Channel of the prerequisite node.
    #[serde(default)]
    pub channel: u32,
}

fn default_kind() -> JobKind {
    JobKind::Calc
}

impl SegmentSpec {
    /// Parse from JSON text.
    pub fn from_json_str(s: &str) -> GearResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: &Path) -> GearResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GearError::Other(anyhow::Error::new(e).context(format!(
                "read segment description '{}'",
                path.display()
            )))
        })?;
        Self::from_json_str(&text)
    }

    /// Resolve node names into an exit-node graph, obtaining each channel's closure from
    /// `closure_for(node, channel, spec)`.
    pub fn to_exit_node<F>(&self, mut closure_for: F) -> GearResult<Arc<ExitNode>>
    where
        F: FnMut(&str, u32, &ChannelSpec) -> Arc<dyn JobClosure>,
    {
        let mut done = HashMap::<String, Arc<ExitNode>>::new();
        let mut open = HashSet::<String>::new();
        self.resolve(&self.exit, 0, &mut done, &mut open, &mut closure_for)
    }

    fn resolve<F>(
        &self,
        name: &str,
        depth: usize,
        done: &mut HashMap<String, Arc<ExitNode>>,
        open: &mut HashSet<String>,
        closure_for: &mut F,
    ) -> GearResult<Arc<ExitNode>>
    where
        F: FnMut(&str, u32, &ChannelSpec) -> Arc<dyn JobClosure>,
    {
        if let Some(node) = done.get(name) {
            return Ok(node.clone());
        }
        if depth > MAX_BUILD_DEPTH {
            return Err(GearError::validation(format!(
                "node '{name}' nested deeper than {MAX_BUILD_DEPTH} levels"
            )));
        }
        let spec = self
            .nodes
            .get(name)
            .ok_or_else(|| GearError::validation(format!("unknown node '{name}'")))?;
        if !open.insert(name.to_owned()) {
            return Err(GearError::validation(format!(
                "prerequisite cycle through node '{name}'"
            )));
        }

        let mut node = ExitNode::new(name);
        for (ch, ch_spec) in spec.channels.iter().enumerate() {
            let mut links = Vec::with_capacity(ch_spec.prerequisites.len());
            for link in &ch_spec.prerequisites {
                let pre = self.resolve(&link.node, depth + 1, done, open, closure_for)?;
                links.push(ExitLink::new(&pre, link.channel));
            }
            node = node.with_channel(closure_for(name, ch as u32, ch_spec), links);
        }

        open.remove(name);
        let node = node.shared();
        done.insert(name.to_owned(), node.clone());
        Ok(node)
    }

    /// Resolve and build the segment; returns it with the ticket of the exit node.
    pub fn build_with<F>(&self, closure_for: F) -> GearResult<(Segment, TicketId)>
    where
        F: FnMut(&str, u32, &ChannelSpec) -> Arc<dyn JobClosure>,
    {
        let exit = self.to_exit_node(closure_for)?;
        build_segment(SegmentId(self.segment), &exit)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/segment.rs"]
mod tests;
