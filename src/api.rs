pub mod caiso;
