use emgr_jit::MethodHandle;

/// A method as presented by the VM on a compile request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDesc {
    pub handle: MethodHandle,
    pub class_name: String,
    pub name: String,
    pub signature: String,
}

impl MethodDesc {
    pub fn new(
        handle: MethodHandle,
        class_name: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            class_name: class_name.into(),
            name: name.into(),
            signature: signature.into(),
        }
    }

    /// `Class.method(sig)`, the form filters match against.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}{}", self.class_name, self.name, self.signature)
    }
}
