// Tests module
// Cross-module flows: registration, certified updates, dispatch, termination
// and post-termination recovery
