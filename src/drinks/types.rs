//! Drink records and the shapes they take on the wire.

use serde::{Deserialize, Serialize};

/// One recipe line: `parts` measures of a named, coloured ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub color: String,
    pub parts: u32,
}

/// Stored drink. Serialized as-is this is the long form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drink {
    pub id: u64,
    /// Unique across the store.
    pub title: String,
    pub recipe: Vec<Ingredient>,
}

impl Drink {
    /// Public representation: ingredient names are withheld.
    pub fn short(&self) -> DrinkSummary {
        DrinkSummary {
            id: self.id,
            title: self.title.clone(),
            recipe: self
                .recipe
                .iter()
                .map(|i| IngredientSummary {
                    color: i.color.clone(),
                    parts: i.parts,
                })
                .collect(),
        }
    }
}

/// Short form of a [`Drink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrinkSummary {
    pub id: u64,
    pub title: String,
    pub recipe: Vec<IngredientSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngredientSummary {
    pub color: String,
    pub parts: u32,
}

/// A recipe as clients send it: a single ingredient or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecipeInput {
    One(Ingredient),
    Many(Vec<Ingredient>),
}

impl RecipeInput {
    /// Flatten and validate.
    pub fn into_ingredients(self) -> Result<Vec<Ingredient>, String> {
        let ingredients = match self {
            RecipeInput::One(ingredient) => vec![ingredient],
            RecipeInput::Many(list) => list,
        };

        if ingredients.is_empty() {
            return Err("recipe must contain at least one ingredient".to_string());
        }
        for ingredient in &ingredients {
            if ingredient.name.trim().is_empty() {
                return Err("ingredient name must not be empty".to_string());
            }
            if ingredient.parts == 0 {
                return Err(format!("ingredient '{}' must have at least one part", ingredient.name));
            }
        }

        Ok(ingredients)
    }
}

/// Body of `POST /drinks`. Both fields are required.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDrink {
    pub title: String,
    pub recipe: RecipeInput,
}

impl NewDrink {
    /// Validated title and recipe.
    pub fn validate(self) -> Result<(String, Vec<Ingredient>), String> {
        let title = validate_title(&self.title)?;
        let recipe = self.recipe.into_ingredients()?;
        Ok((title, recipe))
    }
}

/// Body of `PATCH /drinks/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrinkPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub recipe: Option<RecipeInput>,
}

/// Validated patch ready for the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrinkChanges {
    pub title: Option<String>,
    pub recipe: Option<Vec<Ingredient>>,
}

impl DrinkPatch {
    pub fn validate(self) -> Result<DrinkChanges, String> {
        let title = self.title.as_deref().map(validate_title).transpose()?;
        let recipe = self.recipe.map(RecipeInput::into_ingredients).transpose()?;
        Ok(DrinkChanges { title, recipe })
    }
}

fn validate_title(title: &str) -> Result<String, String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("title must not be empty".to_string());
    }
    Ok(title.to_string())
}
