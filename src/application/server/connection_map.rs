use crate::common::error::{Result, ServerError};
use crate::core::net::connection::TcpConnection;
use std::collections::HashMap;

/// Live connections of one process, by name, with a token index for event
/// dispatch.
#[derive(Default)]
pub struct ConnectionMap {
    connections: HashMap<String, TcpConnection>,
    tokens: HashMap<u64, String>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: TcpConnection) -> Result<()> {
        let name = connection.name().to_string();
        if self.connections.contains_key(&name) || self.tokens.contains_key(&connection.token()) {
            return Err(ServerError::DuplicateConnection(name));
        }
        self.tokens.insert(connection.token(), name.clone());
        self.connections.insert(name, connection);
        Ok(())
    }

    /// Remove `name`, handing the connection back for destruction. A name
    /// that is not present means a double close.
    pub fn remove(&mut self, name: &str) -> Result<TcpConnection> {
        let connection = self
            .connections
            .remove(name)
            .ok_or_else(|| ServerError::UnknownConnection(name.to_string()))?;
        self.tokens.remove(&connection.token());
        Ok(connection)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TcpConnection> {
        self.connections.get_mut(name)
    }

    pub fn get_by_token_mut(&mut self, token: u64) -> Option<&mut TcpConnection> {
        let name = self.tokens.get(&token)?;
        self.connections.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
