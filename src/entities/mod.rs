pub mod coverage_area;
pub mod delivery_audit;
pub mod order;
pub mod order_item;
pub mod partner_sale;
pub mod product;

pub use coverage_area::Entity as CoverageArea;
pub use delivery_audit::Entity as DeliveryAudit;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use partner_sale::Entity as PartnerSale;
pub use product::Entity as Product;
