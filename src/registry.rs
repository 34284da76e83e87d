// Registry - resolution of module hooks and cross-chain commands
// Principle: explicit dependency-injected maps, no ambient global state
use crate::storage::{EventQueue, StateStore};
use crate::types::{BlockHeader, ChainId, CrossChainMessage};
use std::collections::HashMap;

/// Failure raised by a module hook or cross-chain command. Hooks are external
/// code: their failures are caught by the dispatcher, logged and rolled back,
/// never propagated as engine errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        HookError(message.into())
    }
}

/// Execution context handed to module hooks and cross-chain commands
pub struct HookContext<'a> {
    pub store: &'a mut StateStore,
    pub events: &'a mut EventQueue,
    pub header: BlockHeader,
    pub own_chain_id: ChainId,
}

/// Lifecycle hooks a module exposes to the interoperability engine.
///
/// Every hook defaults to a no-op so modules only implement what they need.
/// `recover` participates in state recovery and is opt-in via
/// `supports_recovery`.
pub trait CrossChainMethod {
    fn verify_cross_chain_message(
        &self,
        _ctx: &mut HookContext,
        _ccm: &CrossChainMessage,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn before_cross_chain_command_execute(
        &self,
        _ctx: &mut HookContext,
        _ccm: &CrossChainMessage,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn after_cross_chain_command_execute(
        &self,
        _ctx: &mut HookContext,
        _ccm: &CrossChainMessage,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn before_cross_chain_message_forwarding(
        &self,
        _ctx: &mut HookContext,
        _ccm: &CrossChainMessage,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn supports_recovery(&self) -> bool {
        false
    }

    fn recover(
        &self,
        _ctx: &mut HookContext,
        _substore_prefix: &[u8],
        _store_key: &[u8],
        _store_value: &[u8],
    ) -> Result<(), HookError> {
        Err(HookError::new("recovery hook not implemented"))
    }
}

/// A command a module exposes for cross-chain invocation
pub trait CrossChainCommand {
    fn verify(&self, ctx: &mut HookContext, ccm: &CrossChainMessage) -> Result<(), HookError>;

    fn execute(&self, ctx: &mut HookContext, ccm: &CrossChainMessage) -> Result<(), HookError>;
}

/// Maps module names to their hook objects and (module, command) pairs to
/// their handlers. Hooks run in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    methods: Vec<(String, Box<dyn CrossChainMethod>)>,
    commands: HashMap<(String, String), Box<dyn CrossChainCommand>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method(&mut self, module: &str, method: Box<dyn CrossChainMethod>) {
        self.methods.push((module.to_string(), method));
    }

    pub fn register_command(
        &mut self,
        module: &str,
        command: &str,
        handler: Box<dyn CrossChainCommand>,
    ) {
        self.commands
            .insert((module.to_string(), command.to_string()), handler);
    }

    /// Hook object of one module, if it is registered
    pub fn method(&self, module: &str) -> Option<&dyn CrossChainMethod> {
        self.methods
            .iter()
            .find(|(name, _)| name == module)
            .map(|(_, method)| method.as_ref())
    }

    /// All registered hook objects, in registration order
    pub fn methods(&self) -> impl Iterator<Item = (&str, &dyn CrossChainMethod)> {
        self.methods
            .iter()
            .map(|(name, method)| (name.as_str(), method.as_ref()))
    }

    pub fn command(&self, module: &str, command: &str) -> Option<&dyn CrossChainCommand> {
        self.commands
            .get(&(module.to_string(), command.to_string()))
            .map(|c| c.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopMethod;
    impl CrossChainMethod for NoopMethod {}

    struct NoopCommand;
    impl CrossChainCommand for NoopCommand {
        fn verify(&self, _ctx: &mut HookContext, _ccm: &CrossChainMessage) -> Result<(), HookError> {
            Ok(())
        }
        fn execute(&self, _ctx: &mut HookContext, _ccm: &CrossChainMessage) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn test_resolution() {
        let mut registry = ModuleRegistry::new();
        registry.register_method("token", Box::new(NoopMethod));
        registry.register_command("token", "transfer", Box::new(NoopCommand));

        assert!(registry.method("token").is_some());
        assert!(registry.method("nft").is_none());
        assert!(registry.command("token", "transfer").is_some());
        assert!(registry.command("token", "burn").is_none());
        assert!(registry.command("nft", "transfer").is_none());
        assert_eq!(registry.methods().count(), 1);
    }

    #[test]
    fn test_recovery_is_opt_in() {
        let method = NoopMethod;
        assert!(!method.supports_recovery());
    }
}
