//! Per-type disposition handlers.

use std::collections::HashMap;
use std::fmt;

use tickwire_shared::CommandId;

use super::{Command, CommandDisposition, CommandSink, CommandType};
use crate::codec::BitReader;
use crate::error::CommandError;

/// Handler invoked for every disposition of one command type.
///
/// The reader is positioned at the start of the command payload. `C` is the
/// state the handler works on, typically the connection's game state.
pub type CommandHandler<C> = Box<
    dyn FnMut(&mut C, &mut BitReader<'_>, CommandId, CommandDisposition) -> Result<(), CommandError>
        + Send,
>;

/// Maps command types to their handlers.
pub struct CommandRegistry<C> {
    handlers: HashMap<CommandType, CommandHandler<C>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for CommandRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("CommandRegistry").field("handlers", &types).finish()
    }
}

impl<C> CommandRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Installs `handler` for `command_type`, replacing any previous one.
    pub fn register<F>(&mut self, command_type: CommandType, handler: F)
    where
        F: FnMut(&mut C, &mut BitReader<'_>, CommandId, CommandDisposition) -> Result<(), CommandError>
            + Send
            + 'static,
    {
        if self.handlers.insert(command_type, Box::new(handler)).is_some() {
            tracing::debug!("Replaced handler for {:?}", command_type);
        }
    }

    /// Removes the handler for `command_type`.
    pub fn unregister(&mut self, command_type: CommandType) -> bool {
        self.handlers.remove(&command_type).is_some()
    }

    /// Whether a handler is installed for `command_type`.
    #[must_use]
    pub fn contains(&self, command_type: CommandType) -> bool {
        self.handlers.contains_key(&command_type)
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Runs the handler for `command`, if any.
    ///
    /// A handler error is logged and swallowed so one bad command can't
    /// stall the rest of the queue.
    pub fn dispatch(&mut self, context: &mut C, command: &Command, disposition: CommandDisposition) {
        let Some(handler) = self.handlers.get_mut(&command.command_type) else {
            tracing::trace!("No handler for {:?} ({:?})", command.command_type, disposition);
            return;
        };

        let mut reader = BitReader::new(&command.payload);
        if let Err(error) = handler(context, &mut reader, command.id, disposition) {
            tracing::error!(
                "Handler for {} ({:?}, {:?}) failed: {}",
                command.id,
                command.command_type,
                disposition,
                error
            );
        }
    }

    /// Pairs the registry with `context` for use as a [`CommandSink`].
    pub fn sink<'a>(&'a mut self, context: &'a mut C) -> Dispatcher<'a, C> {
        Dispatcher {
            registry: self,
            context,
        }
    }
}

/// A registry bound to its handler context.
pub struct Dispatcher<'a, C> {
    registry: &'a mut CommandRegistry<C>,
    context: &'a mut C,
}

impl<C> CommandSink for Dispatcher<'_, C> {
    fn on_command(&mut self, command: &Command, disposition: CommandDisposition) {
        self.registry.dispatch(self.context, command, disposition);
    }
}
