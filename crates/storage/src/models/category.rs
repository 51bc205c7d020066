use std::fmt;

/// Scoring category of a vehicle: the (vehicle class, vehicle type) pairing.
///
/// The category is always derived from a team and never stored; its label
/// is only used for display and as the grouping key in score tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Category {
    vehicle_class: String,
    vehicle_type: String,
}

impl Category {
    /// Builds a category from a class and a type, trimming surrounding
    /// whitespace so that "Open " and "Open" group together.
    ///
    /// # Examples
    ///
    /// ```
    /// use storage::models::Category;
    ///
    /// let category = Category::new("Open", "Kart");
    /// assert_eq!(category.label(), "Open Kart");
    /// ```
    pub fn new(vehicle_class: impl AsRef<str>, vehicle_type: impl AsRef<str>) -> Self {
        Self {
            vehicle_class: vehicle_class.as_ref().trim().to_string(),
            vehicle_type: vehicle_type.as_ref().trim().to_string(),
        }
    }

    pub fn vehicle_class(&self) -> &str {
        &self.vehicle_class
    }

    pub fn vehicle_type(&self) -> &str {
        &self.vehicle_type
    }

    /// Display label, `class + " " + type`.
    pub fn label(&self) -> String {
        format!("{} {}", self.vehicle_class, self.vehicle_type)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.vehicle_class, self.vehicle_type)
    }
}
