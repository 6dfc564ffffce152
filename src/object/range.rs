/// A numeric range `from..to`, inclusive on both ends; direction is implied
/// by `from < to`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjRange {
  pub from: f64,
  pub to: f64,
}

impl ObjRange {
  pub fn new(from: f64, to: f64) -> ObjRange {
    ObjRange { from, to }
  }
}
