use document_core::{CollapsedLineSection, HeightTree, TextDocument};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Plain per-line model of a height tree.
struct Model {
    heights: Vec<f64>,
    sections: Vec<(CollapsedLineSection, usize, usize)>,
}

impl Model {
    fn collapsed_lines(&self) -> Vec<bool> {
        let mut collapsed = vec![false; self.heights.len() + 1];
        for &(_, start, end) in &self.sections {
            collapsed[start..=end].fill(true);
        }
        collapsed
    }

    fn insert_line(&mut self, line: usize, height: f64) {
        self.heights.insert(line - 1, height);
        for (_, start, end) in &mut self.sections {
            if line <= *start {
                *start += 1;
            }
            if line <= *end {
                *end += 1;
            }
        }
    }

    fn delete_line(&mut self, line: usize) {
        self.heights.remove(line - 1);
        self.sections
            .retain(|&(_, start, end)| !(start == line && end == line));
        for (_, start, end) in &mut self.sections {
            if line < *start {
                *start -= 1;
            }
            if line <= *end {
                *end -= 1;
            }
        }
    }
}

fn check(tree: &HeightTree, model: &Model) {
    tree.check_invariants();
    assert_eq!(tree.line_count(), model.heights.len());
    let collapsed = model.collapsed_lines();
    let mut top = 0.0;
    for line in 1..=model.heights.len() {
        let height = model.heights[line - 1];
        assert_eq!(tree.get_height(line), Ok(height));
        assert_eq!(tree.is_collapsed(line), Ok(collapsed[line]), "line {line}");
        assert_eq!(tree.get_visual_position(line), Ok(top), "line {line}");
        if !collapsed[line] {
            assert_eq!(tree.get_line_by_visual_position(top + 0.5), line);
            top += height;
        }
    }
    assert_eq!(tree.total_height(), top);
    for &(section, start, end) in &model.sections {
        assert!(tree.is_section_collapsed(section));
        assert_eq!(tree.section_start(section), Some(start));
        assert_eq!(tree.section_end(section), Some(end));
    }
    assert_eq!(tree.collapsed_sections().len(), model.sections.len());
}

#[test]
fn test_random_operations_match_model() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut tree = HeightTree::new(50, 2.0);
    let mut model = Model {
        heights: vec![2.0; 50],
        sections: Vec::new(),
    };
    check(&tree, &model);

    for step in 0..2000 {
        let count = model.heights.len();
        match rng.gen_range(0..10) {
            0..=2 => {
                let line = rng.gen_range(1..=count + 1);
                tree.insert_line(line).unwrap();
                model.insert_line(line, 2.0);
            }
            3..=4 if count > 1 => {
                let line = rng.gen_range(1..=count);
                tree.delete_line(line).unwrap();
                model.delete_line(line);
            }
            5..=6 => {
                let line = rng.gen_range(1..=count);
                let height = rng.gen_range(1..=5) as f64;
                tree.set_height(line, height).unwrap();
                model.heights[line - 1] = height;
            }
            7..=8 => {
                let start = rng.gen_range(1..=count);
                let end = rng.gen_range(start..=count.min(start + 40));
                let section = tree.collapse_text(start, end).unwrap();
                model.sections.push((section, start, end));
            }
            _ => {
                if !model.sections.is_empty() {
                    let index = rng.gen_range(0..model.sections.len());
                    let (section, _, _) = model.sections.swap_remove(index);
                    tree.uncollapse(section);
                    assert!(!tree.is_section_collapsed(section));
                }
            }
        }
        if step % 10 == 0 {
            check(&tree, &model);
        }
    }
    check(&tree, &model);
}

#[test]
fn test_nested_sections() {
    let mut tree = HeightTree::new(200, 1.0);
    let outer = tree.collapse_text(10, 150).unwrap();
    let inner = tree.collapse_text(20, 30).unwrap();
    assert_eq!(tree.total_height(), 59.0);

    tree.uncollapse(outer);
    assert_eq!(tree.total_height(), 189.0);
    assert!(tree.is_collapsed(25).unwrap());
    assert!(!tree.is_collapsed(50).unwrap());

    tree.uncollapse(inner);
    assert_eq!(tree.total_height(), 200.0);
    tree.check_invariants();
}

#[test]
fn test_height_tree_follows_document_lines() {
    let text: String = (1..=100).map(|i| format!("line {i}\n")).collect();
    let mut doc = TextDocument::new(&text);
    doc.add_height_tree(10.0).unwrap();
    assert_eq!(doc.height_tree().unwrap().line_count(), 101);

    let heights = doc.height_tree_mut().unwrap();
    heights.set_height(5, 30.0).unwrap();
    let section = heights.collapse_text(20, 29).unwrap();
    assert_eq!(heights.total_height(), 1010.0 + 20.0 - 100.0);

    // Split line 5: it keeps its height, the new line 6 gets the default.
    let offset = doc.get_offset(5, 3).unwrap();
    doc.insert(offset, "\n").unwrap();
    let heights = doc.height_tree().unwrap();
    assert_eq!(heights.line_count(), doc.line_count());
    assert_eq!(heights.get_height(5), Ok(30.0));
    assert_eq!(heights.get_height(6), Ok(10.0));
    assert_eq!(heights.section_start(section), Some(21));
    assert_eq!(heights.section_end(section), Some(30));

    // Join lines 21..=25 into one, which removes four lines of the section.
    let start = doc.get_offset(21, 1).unwrap();
    let end = doc.get_offset(25, 1).unwrap();
    doc.remove(start, end - start).unwrap();
    let heights = doc.height_tree().unwrap();
    assert_eq!(heights.line_count(), doc.line_count());
    assert_eq!(heights.section_start(section), Some(21));
    assert_eq!(heights.section_end(section), Some(26));
    heights.check_invariants();
}

#[test]
fn test_removing_whole_section_dissolves_it() {
    let text = "a\nb\nc\nd\ne\nf";
    let mut doc = TextDocument::new(text);
    doc.add_height_tree(10.0).unwrap();
    let section = doc.height_tree_mut().unwrap().collapse_text(3, 4).unwrap();
    let kept = doc.height_tree_mut().unwrap().collapse_text(2, 2).unwrap();

    // Removes "b\nc\n". Line 2 survives and takes the text of line 4; lines 3 and 4 go away.
    doc.remove(2, 4).unwrap();
    assert_eq!(doc.get_line_by_number(2).unwrap().length(), 1);
    let heights = doc.height_tree().unwrap();
    assert!(!heights.is_section_collapsed(section));
    assert_eq!(heights.section_start(kept), Some(2));
    assert_eq!(heights.total_height(), 30.0);
}

#[test]
fn test_set_text_resets_sections() {
    let mut doc = TextDocument::new("1\n2\n3\n4");
    doc.add_height_tree_with_default().unwrap();
    let section = doc.height_tree_mut().unwrap().collapse_text(1, 2).unwrap();

    doc.set_text("only\ntwo").unwrap();
    let heights = doc.height_tree().unwrap();
    assert!(!heights.is_section_collapsed(section));
    assert_eq!(heights.line_count(), 2);
    assert_eq!(heights.total_height(), 2.0 * doc.options().default_line_height);
}

#[test]
fn test_changing_default_height() {
    let mut tree = HeightTree::new(40, 10.0);
    tree.set_height(3, 25.0).unwrap();
    tree.set_default_line_height(12.0);
    assert_eq!(tree.get_height(1), Ok(12.0));
    assert_eq!(tree.get_height(3), Ok(25.0));
    assert_eq!(tree.total_height(), 39.0 * 12.0 + 25.0);
    tree.insert_line(41).unwrap();
    assert_eq!(tree.get_height(41), Ok(12.0));
}

#[test]
fn test_directly_edited_tree_is_rebuilt_on_next_insert() {
    let mut doc = TextDocument::new("a\nb");
    doc.add_height_tree(10.0).unwrap();
    doc.height_tree_mut().unwrap().delete_line(1).unwrap();
    assert_eq!(doc.height_tree().unwrap().line_count(), 1);

    doc.insert(doc.text_length(), "\nc").unwrap();
    assert!(!doc.is_in_update());
    let heights = doc.height_tree().unwrap();
    assert_eq!(heights.line_count(), 3);
    assert_eq!(heights.total_height(), 30.0);
    heights.check_invariants();

    // The document keeps working afterwards.
    doc.insert(0, "x\n").unwrap();
    assert_eq!(doc.height_tree().unwrap().line_count(), doc.line_count());
}

#[test]
fn test_directly_edited_tree_is_rebuilt_on_next_removal() {
    let mut doc = TextDocument::new("a\nb");
    doc.add_height_tree(10.0).unwrap();
    let heights = doc.height_tree_mut().unwrap();
    heights.insert_line(1).unwrap();
    heights.set_height(2, 50.0).unwrap();

    doc.remove(1, 2).unwrap();
    assert_eq!(&*doc.text().unwrap(), "a");
    let heights = doc.height_tree().unwrap();
    assert_eq!(heights.line_count(), 1);
    assert_eq!(heights.get_height(1), Ok(10.0));
}
