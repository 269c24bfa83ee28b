// Domain-layer modules and shared errors/models
pub mod rotation {
    pub use crate::rotation::*;
}

pub mod store {
    pub use crate::store::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
