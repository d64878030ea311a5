/// Items are either points or clouds.
pub type ItemId = u32;

/// Dense handle into the point table.
pub type PointId = u32;

/// Clouds are weighted collections of points. Groups of clouds form a cloud
/// type, and cloud IDs are dense within their type.
pub type CloudType = u32;
pub type CloudId = u32;

/// A cloud's members: `(membership weight, point ID)`.
pub type CloudPoints = Vec<(f32, PointId)>;

/// The clouds of one type a point belongs to: `(membership weight, cloud ID)`.
pub type PointCloudMemberships = Vec<(f32, CloudId)>;

/// One lookup result. The ID names a point or a cloud depending on the
/// requested results type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedItem {
    pub weight: f32,
    pub id: ItemId,
}

impl WeightedItem {
    pub fn new(weight: f32, id: ItemId) -> Self {
        Self { weight, id }
    }
}
