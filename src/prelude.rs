pub use fugit::{ExtU32 as _, RateExtU32 as _};

pub use crate::hal::prelude::*;
#[cfg(feature = "device-selected")]
pub use crate::rcc::RccExt as _apm32f4xx_hal_rcc_RccExt;
