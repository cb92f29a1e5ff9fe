use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::election::NodeContext;
use crate::error::Result;
use crate::protocol::Envelope;

/// Reaction of a node to a named command.
///
/// Handlers run synchronously inside the election loop, so they must not
/// block. Anything long-running belongs in a spawned task. A returned error
/// is logged by the loop and never stops the node.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, ctx: &NodeContext, envelope: &Envelope) -> Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(&NodeContext, &Envelope) -> Result<()> + Send + Sync,
{
    fn handle(&self, ctx: &NodeContext, envelope: &Envelope) -> Result<()> {
        self(ctx, envelope)
    }
}

/// Command name to handler table.
///
/// Built once before the node starts and read-only afterwards. Registering
/// a name twice overwrites the earlier handler; the last registration wins.
#[derive(Clone, Default)]
pub struct CommandRouter {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler<H>(&mut self, name: impl Into<String>, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn find_handler(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("CommandRouter")
            .field("commands", &names)
            .finish()
    }
}
