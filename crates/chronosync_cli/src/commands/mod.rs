pub(crate) mod history;
pub(crate) mod meta;
pub(crate) mod queue;
pub(crate) mod recover;
pub(crate) mod shared;
pub(crate) mod status;
pub(crate) mod sync;
