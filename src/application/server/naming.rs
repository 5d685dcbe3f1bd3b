//! Process-local connection ids and the names derived from them.

/// Monotonic id source, starting at 1. Ids are never reused.
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    next: u64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Label distinguishing one worker's names from another's.
pub fn worker_label(worker: usize) -> String {
    format!("-worker{}", worker)
}

/// `{server}{id}`. Only ever logged; the parent tracks no connections.
pub fn connection_name_in_parent(server: &str, id: u64) -> String {
    format!("{}{}", server, id)
}

/// `{server}{label}_connection_{id}`
pub fn connection_name_in_worker(server: &str, worker: usize, id: u64) -> String {
    format!("{}{}_connection_{}", server, worker_label(worker), id)
}
