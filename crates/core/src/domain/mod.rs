pub mod alias;
pub mod bulk_quote;
pub mod commission;
pub mod device;
pub mod grade;
pub mod order;
pub mod partner;
pub mod price_list;
pub mod principal;
pub mod quote;
