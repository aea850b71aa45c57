//! Client-area regions of the target window, in a 1024x768 layout.

use butler_core::{Point, Region};
use rand::Rng;

pub const INVENTORY: Region = Region::new(780, 28, 215, 344);
pub const XP_SKILLS: Region = Region::new(600, 580, 424, 60);
pub const CHAT_AREA: Region = Region::new(0, 400, 400, 230);

/// Offset `p` by a random amount in `[-variation, variation)` on each axis.
pub fn scatter(p: Point, variation: i32) -> Point {
    if variation <= 0 {
        return p;
    }
    let mut rng = rand::thread_rng();
    p.offset(
        rng.gen_range(-variation..variation),
        rng.gen_range(-variation..variation),
    )
}
