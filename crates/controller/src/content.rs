//! Replies for the conversation feed.

/// Source of conversation replies.  The controller only forwards what it gets.
pub trait ContentSource {
    fn fact(&mut self) -> String;
    fn joke(&mut self) -> String;
    fn recipe(&mut self) -> String;
}

const FACTS: &[&str] = &[
    "Coriander and cilantro are the same plant: cilantro is the leaf, coriander the seed.",
    "Coriander bolts quickly in heat; a shady spot keeps it leafy for longer.",
    "Some people taste soap in coriander leaves, thanks to a variant of the OR6A2 gene.",
    "Coriander seeds have been found in Tutankhamun's tomb.",
    "Coriander roots are edible and a staple of Thai curry pastes.",
];

const JOKES: &[&str] = &[
    "Why did the coriander blush? It saw the salad dressing.",
    "What do you call a sad herb? Blue-cilantro.",
    "I told my coriander a secret. Now the whole garden has herb it.",
    "Why is coriander never lonely? It always comes in a bunch.",
];

const RECIPES: &[&str] = &[
    "Salsa verde: coriander, parsley, capers, garlic, lemon and olive oil.",
    "Green chutney: coriander, mint, green chilli, ginger and lime.",
    "Coriander rice: stir chopped leaves and lime zest through steamed rice.",
    "Tomato salad: tomatoes, red onion, coriander, lime juice and salt.",
];

/// Cycles through built-in coriander facts, jokes and recipes in order.
#[derive(Debug, Default)]
pub struct BuiltinContent {
    next_fact: usize,
    next_joke: usize,
    next_recipe: usize,
}

fn take(list: &[&str], cursor: &mut usize) -> String {
    let item = list[*cursor % list.len()];
    *cursor = (*cursor + 1) % list.len();
    item.to_string()
}

impl ContentSource for BuiltinContent {
    fn fact(&mut self) -> String {
        take(FACTS, &mut self.next_fact)
    }

    fn joke(&mut self) -> String {
        take(JOKES, &mut self.next_joke)
    }

    fn recipe(&mut self) -> String {
        take(RECIPES, &mut self.next_recipe)
    }
}
