//! Carrinho da loja do app (somente local, até o checkout)

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{round_currency, NewOrder, OrderItemRequest, Product};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
    pub image_url: Option<String>,
}

impl CartItem {
    pub fn subtotal(&self) -> f64 {
        round_currency(self.unit_price * self.quantity as f64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adiciona produto; se já existe no carrinho, soma a quantidade
    pub fn add(&mut self, product: &Product, quantity: i64) -> AppResult<()> {
        if quantity <= 0 {
            return Err(AppError::Validation("Quantidade inválida".to_string()));
        }
        let price = match product.sale_price {
            Some(p) if product.is_for_sale && product.active => p,
            _ => {
                return Err(AppError::Validation(format!(
                    "Produto indisponível para venda: {}",
                    product.name
                )))
            }
        };

        match self.items.iter_mut().find(|i| i.product_id == product.id) {
            Some(item) => item.quantity += quantity,
            None => self.items.push(CartItem {
                product_id: product.id.clone(),
                name: product.name.clone(),
                unit_price: price,
                quantity,
                image_url: product.image_url.clone(),
            }),
        }
        Ok(())
    }

    /// Define a quantidade; zero ou menos remove a linha
    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) {
        if quantity <= 0 {
            self.remove(product_id);
            return;
        }
        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = quantity;
        }
    }

    pub fn remove(&mut self, product_id: &str) {
        self.items.retain(|i| i.product_id != product_id);
    }

    pub fn total(&self) -> f64 {
        round_currency(self.items.iter().map(|i| i.unit_price * i.quantity as f64).sum())
    }

    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn to_order_request(
        &self,
        patient_id: &str,
        shipping_address: Option<String>,
    ) -> AppResult<NewOrder> {
        if self.is_empty() {
            return Err(AppError::Validation("Carrinho vazio".to_string()));
        }
        Ok(NewOrder {
            patient_id: patient_id.to_string(),
            items: self
                .items
                .iter()
                .map(|i| OrderItemRequest {
                    product_id: i.product_id.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect(),
            shipping_address,
            source: "pwa".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProduct;

    fn product(name: &str, price: f64) -> Product {
        NewProduct {
            name: name.into(),
            description: None,
            category: None,
            quantity: 10,
            min_quantity: 1,
            sale_price: Some(price),
            is_for_sale: true,
            image_url: None,
        }
        .into_product()
    }

    #[test]
    fn test_adding_same_product_increments_quantity() {
        let mut cart = Cart::new();
        let serum = product("Sérum", 89.9);
        cart.add(&serum, 1).unwrap();
        cart.add(&serum, 1).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn test_removing_last_unit_removes_line() {
        let mut cart = Cart::new();
        let serum = product("Sérum", 89.9);
        cart.add(&serum, 1).unwrap();
        cart.update_quantity(&serum.id, 0);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_total_rounds_to_cents() {
        let mut cart = Cart::new();
        cart.add(&product("A", 0.1), 3).unwrap();
        cart.add(&product("B", 19.99), 2).unwrap();
        assert_eq!(cart.total(), 40.28);
    }

    #[test]
    fn test_product_not_for_sale() {
        let mut cart = Cart::new();
        let mut p = product("Insumo", 10.0);
        p.is_for_sale = false;
        assert!(cart.add(&p, 1).is_err());
    }

    #[test]
    fn test_order_request() {
        let mut cart = Cart::new();
        assert!(cart.to_order_request("pat1", None).is_err());
        let p = product("Protetor", 59.0);
        cart.add(&p, 2).unwrap();
        let req = cart.to_order_request("pat1", Some("Rua A, 10".into())).unwrap();
        assert_eq!(req.items.len(), 1);
        assert_eq!(req.items[0].quantity, 2);
        assert_eq!(req.source, "pwa");
    }
}
