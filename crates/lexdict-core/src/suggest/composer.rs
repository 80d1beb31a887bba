use crate::unicode;

/// One typed character, with the touch coordinates when the keyboard
/// reported them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPoint {
    pub code_point: u32,
    pub x: Option<i32>,
    pub y: Option<i32>,
}

/// The word being typed: code points and touch points, plus whether the
/// input is a gesture trail rather than taps.
#[derive(Debug, Clone, Default)]
pub struct WordComposer {
    points: Vec<InputPoint>,
    is_gesture: bool,
}

impl WordComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Taps without coordinates, one per char of `text`.
    pub fn from_typed(text: &str) -> Self {
        let mut composer = Self::new();
        for c in text.chars() {
            composer.add_code_point(c as u32);
        }
        composer
    }

    pub fn add_code_point(&mut self, code_point: u32) {
        self.points.push(InputPoint {
            code_point,
            x: None,
            y: None,
        });
    }

    pub fn add_point(&mut self, code_point: u32, x: i32, y: i32) {
        self.points.push(InputPoint {
            code_point,
            x: Some(x),
            y: Some(y),
        });
    }

    pub fn delete_last(&mut self) -> Option<InputPoint> {
        self.points.pop()
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.is_gesture = false;
    }

    pub fn set_gesture(&mut self, is_gesture: bool) {
        self.is_gesture = is_gesture;
    }

    pub fn is_gesture(&self) -> bool {
        self.is_gesture
    }

    pub fn points(&self) -> &[InputPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn code_points(&self) -> Vec<u32> {
        self.points.iter().map(|p| p.code_point).collect()
    }

    pub fn typed_word(&self) -> String {
        self.points
            .iter()
            .filter_map(|p| char::from_u32(p.code_point))
            .collect()
    }

    pub fn is_first_char_capitalized(&self) -> bool {
        self.points
            .first()
            .map_or(false, |p| unicode::is_upper_case(p.code_point))
    }

    /// Two or more letters, all upper case.
    pub fn is_all_upper_case(&self) -> bool {
        self.points.len() > 1 && self.points.iter().all(|p| unicode::is_upper_case(p.code_point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_word_and_case() {
        let mut composer = WordComposer::from_typed("Hello");
        assert_eq!(composer.typed_word(), "Hello");
        assert!(composer.is_first_char_capitalized());
        assert!(!composer.is_all_upper_case());
        composer.delete_last();
        assert_eq!(composer.len(), 4);

        let shout = WordComposer::from_typed("NASA");
        assert!(shout.is_all_upper_case());
        assert!(!WordComposer::from_typed("I").is_all_upper_case());
    }

    #[test]
    fn points_keep_coordinates() {
        let mut composer = WordComposer::new();
        composer.add_point('q' as u32, 50, 75);
        composer.set_gesture(true);
        assert_eq!(composer.points()[0].x, Some(50));
        assert!(composer.is_gesture());
        composer.reset();
        assert!(composer.is_empty());
        assert!(!composer.is_gesture());
    }
}
