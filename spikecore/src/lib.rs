// data module
pub mod data {
    pub mod events;
}

// algorithm module
pub mod algorithm {
    pub mod neighbors;
    pub mod matching;
    pub mod timeline;
}
