pub(crate) mod events;
pub(crate) mod records;
pub(crate) mod sessions;
