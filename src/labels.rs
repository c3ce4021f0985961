use std::collections::HashMap;

use string_cache::DefaultAtom;

/**
  A label table maps label names to the instruction address they mark. The assembler fills it in
  a first pass over every unit and resolves operands against it in a second. Several labels may
  name the same address, so the table is a plain map keyed by interned name rather than a
  bijection.
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Label {
  pub address : u64,
  /// Index of the assembly unit that defined the label.
  pub unit    : usize,
}

#[derive(Clone, Debug, Default)]
pub struct LabelTable {
  table: HashMap<DefaultAtom, Label>
}

impl LabelTable {

  pub fn new() -> LabelTable {
    LabelTable {
      table: HashMap::new()
    }
  }

  /// Adds a label. If the name is taken the table is unchanged and the existing label is
  /// returned.
  pub fn insert(&mut self, name: DefaultAtom, label: Label) -> Result<(), Label> {
    match self.table.get(&name) {
      Some(existing) => Err(*existing),
      None => {
        self.table.insert(name, label);
        Ok(())
      }
    }
  }

  pub fn get(&self, name: &str) -> Option<Label> {
    self.table.get(&DefaultAtom::from(name)).copied()
  }

  pub fn address(&self, name: &str) -> Option<u64> {
    self.get(name).map(|label| label.address)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.table.contains_key(&DefaultAtom::from(name))
  }

  pub fn remove(&mut self, name: &str) -> Option<Label> {
    self.table.remove(&DefaultAtom::from(name))
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  /// Every label, ordered by address and then by name.
  pub fn iter(&self) -> impl Iterator<Item = (&DefaultAtom, &Label)> {
    let mut labels: Vec<(&DefaultAtom, &Label)> = self.table.iter().collect();
    labels.sort_by(|a, b| (a.1.address, &*a.0).cmp(&(b.1.address, &*b.0)));
    labels.into_iter()
  }
}
