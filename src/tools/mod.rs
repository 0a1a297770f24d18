//! Small self-contained helpers shared by the codecs above.

pub mod bitstream;
