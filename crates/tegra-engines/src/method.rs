/// A single method call decoded from the command stream.
///
/// `method` is the register index inside the engine bound to `subchannel`. `method_count` is the
/// number of arguments still pending for the command header this call was decoded from, including
/// this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodCall {
    pub method: u32,
    pub argument: u32,
    pub subchannel: u32,
    pub method_count: u32,
}

impl MethodCall {
    pub fn new(method: u32, argument: u32, subchannel: u32, method_count: u32) -> Self {
        Self {
            method,
            argument,
            subchannel,
            method_count,
        }
    }

    /// Single call on subchannel 0; mostly useful when driving an engine directly.
    pub fn single(method: u32, argument: u32) -> Self {
        Self::new(method, argument, 0, 1)
    }

    pub fn is_last_call(&self) -> bool {
        self.method_count <= 1
    }
}
