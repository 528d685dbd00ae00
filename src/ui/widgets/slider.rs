//! Slider row for numeric resource fields

use ratatui::prelude::*;

use crate::launcher::resources::Bounds;

const BAR_WIDTH: usize = 20;

/// One resource field drawn as `label [■■■■□□□□] value  hint`
pub struct Slider<'a> {
    pub label: &'a str,
    pub value: f64,
    pub bounds: Bounds,
    /// Value as shown to the user ("4g", "2 cuda.shares")
    pub display: String,
    pub selected: bool,
    /// Text being typed, shown instead of the value
    pub editing: Option<&'a str>,
}

impl<'a> Slider<'a> {
    pub fn new(label: &'a str, value: f64, bounds: Bounds, display: String) -> Self {
        Self {
            label,
            value,
            bounds,
            display,
            selected: false,
            editing: None,
        }
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    pub fn editing(mut self, buffer: Option<&'a str>) -> Self {
        self.editing = buffer;
        self
    }

    /// Number of filled cells in the bar
    fn filled(&self) -> usize {
        let span = self.bounds.max - self.bounds.min;
        if !self.bounds.is_satisfiable() || span <= 0.0 {
            return if self.bounds.is_satisfiable() { BAR_WIDTH } else { 0 };
        }
        let ratio = ((self.value - self.bounds.min) / span).clamp(0.0, 1.0);
        (ratio * BAR_WIDTH as f64).round() as usize
    }

    pub fn line(&self) -> Line<'static> {
        let prefix = if self.selected { "> " } else { "  " };
        let disabled = !self.bounds.is_satisfiable();

        let bar_color = if disabled {
            Color::Red
        } else if self.selected {
            Color::Cyan
        } else {
            Color::Blue
        };
        let filled = self.filled();
        let bar = format!(
            "[{}{}]",
            "■".repeat(filled),
            "□".repeat(BAR_WIDTH - filled)
        );

        let value = match self.editing {
            Some(buffer) => format!("{}|", buffer),
            None => self.display.clone(),
        };
        let value_style = if self.editing.is_some() {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else if self.selected {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };

        let hint = if disabled {
            "unavailable".to_string()
        } else if self.editing.is_some() {
            "[Enter] Done  [Esc] Cancel".to_string()
        } else if self.selected {
            format!("{} - {}  [←/→] [Tab] Edit", trim(self.bounds.min), trim(self.bounds.max))
        } else {
            String::new()
        };

        Line::from(vec![
            Span::styled(
                prefix.to_string(),
                if self.selected {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default()
                },
            ),
            Span::styled(format!("{:16}", self.label), Style::default().fg(Color::Yellow)),
            Span::styled(bar, Style::default().fg(bar_color)),
            Span::raw(" "),
            Span::styled(format!("{:18}", value), value_style),
            Span::styled(hint, Style::default().fg(Color::DarkGray)),
        ])
    }
}

fn trim(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value).trim_end_matches('0').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_cells_follow_value() {
        let bounds = Bounds::new(1.0, 11.0, 1.0);
        assert_eq!(Slider::new("CPU", 1.0, bounds, "1".into()).filled(), 0);
        assert_eq!(Slider::new("CPU", 6.0, bounds, "6".into()).filled(), BAR_WIDTH / 2);
        assert_eq!(Slider::new("CPU", 11.0, bounds, "11".into()).filled(), BAR_WIDTH);
    }

    #[test]
    fn test_unsatisfiable_bounds_draw_empty() {
        let bounds = Bounds::new(4.0, 2.0, 1.0);
        let slider = Slider::new("CPU", 4.0, bounds, "4".into()).selected(true);
        assert_eq!(slider.filled(), 0);
        let text: String = slider.line().spans.iter().map(|s| s.content.to_string()).collect();
        assert!(text.contains("unavailable"));
    }

    #[test]
    fn test_editing_shows_buffer() {
        let bounds = Bounds::new(0.25, 8.0, 0.25);
        let slider = Slider::new("Memory", 2.0, bounds, "2g".into()).editing(Some("3.5g"));
        let text: String = slider.line().spans.iter().map(|s| s.content.to_string()).collect();
        assert!(text.contains("3.5g|"));
    }
}
