//! Boundary-aware selection of one point's readings

use super::Boundary;
use crate::extent::ReadInterval;
use chrono::NaiveDateTime;

/// Readings of one point selected against a window
///
/// `Inside` and `Interpolated` keep `start <= t <= end`. `Outside` also keeps
/// the last reading before the window and the first one after it.
#[derive(Debug)]
pub(crate) struct PointWindow<T> {
    boundary: Boundary,
    before: Option<(NaiveDateTime, T)>,
    inside: Vec<T>,
    after: Option<(NaiveDateTime, T)>,
}

impl<T> PointWindow<T> {
    pub(crate) fn new(boundary: Boundary) -> Self {
        Self {
            boundary,
            before: None,
            inside: Vec::new(),
            after: None,
        }
    }

    /// Offer a reading taken at `t`; readings may arrive in any order
    pub(crate) fn offer(&mut self, t: NaiveDateTime, item: T, interval: &ReadInterval) {
        if interval.contains(t) {
            self.inside.push(item);
            return;
        }
        if self.boundary != Boundary::Outside {
            return;
        }

        if t < interval.start {
            if self.before.as_ref().map_or(true, |(prev, _)| t > *prev) {
                self.before = Some((t, item));
            }
        } else if self.after.as_ref().map_or(true, |(next, _)| t < *next) {
            self.after = Some((t, item));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inside.len() + usize::from(self.before.is_some()) + usize::from(self.after.is_some())
    }

    /// Selected readings: before, inside in offered order, after
    pub(crate) fn into_items(self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len());
        items.extend(self.before.map(|(_, item)| item));
        items.extend(self.inside);
        items.extend(self.after.map(|(_, item)| item));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: &str = "%Y-%m-%dT%H-%M-%S";

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, FMT).unwrap()
    }

    fn window() -> ReadInterval {
        ReadInterval::new(at("2024-03-01T08-00-00"), at("2024-03-01T12-00-00"))
    }

    fn offer_all(boundary: Boundary) -> Vec<&'static str> {
        let mut points = PointWindow::new(boundary);
        for time in [
            "2024-03-01T06-00-00",
            "2024-03-01T13-00-00",
            "2024-03-01T07-00-00",
            "2024-03-01T08-00-00",
            "2024-03-01T12-00-00",
            "2024-03-01T14-00-00",
        ] {
            points.offer(at(time), time, &window());
        }
        points.into_items()
    }

    #[test]
    fn test_inside_keeps_closed_window() {
        assert_eq!(
            offer_all(Boundary::Inside),
            vec!["2024-03-01T08-00-00", "2024-03-01T12-00-00"]
        );
        assert_eq!(offer_all(Boundary::Interpolated), offer_all(Boundary::Inside));
    }

    #[test]
    fn test_outside_adds_nearest_neighbours() {
        assert_eq!(
            offer_all(Boundary::Outside),
            vec![
                "2024-03-01T07-00-00",
                "2024-03-01T08-00-00",
                "2024-03-01T12-00-00",
                "2024-03-01T13-00-00",
            ]
        );
    }
}
